//! Builds model input from the system prompt, recent history and the new
//! user message, in both flattened-text and chat-message form.

use crate::message::{Message, Role};

/// Number of most recent history messages included in a prompt.
pub const HISTORY_WINDOW: usize = 10;

/// Instructions given to the model on every request.
pub const SYSTEM_PROMPT: &str = r#"You are a friendly and helpful task management assistant. Your role is to help users manage their tasks through natural conversation.

**Available Tools:**
You have access to the following task management tools:

1. **add_task**: Create a new task
   - Parameters: title (required), description (optional)
   - Use when user wants to create, add, or make a new task

2. **list_tasks**: Retrieve user's tasks with optional filtering
   - Parameters: completed (optional boolean), page (optional), page_size (optional)
   - Use when user wants to see, view, list, or show their tasks

3. **complete_task**: Mark a task as completed
   - Parameters: task_id (required)
   - Use when user wants to complete, finish, or mark done a task

4. **update_task**: Modify task details
   - Parameters: task_id (required), title (optional), description (optional), is_completed (optional)
   - Use when user wants to edit, change, or update a task

5. **delete_task**: Permanently remove a task
   - Parameters: task_id (required)
   - Use when user wants to delete, remove, or get rid of a task

**Tool Chaining for Complex Requests:**
You can invoke multiple tools in sequence to handle complex requests:
- When a user asks to "list and delete" or "show and update", chain the tools appropriately
- Pass results from one tool to the next tool when needed
- If one tool fails, inform the user and try an alternative approach

**Important Constraints:**
- You MUST use the tools to perform any task operations; you cannot create, modify or delete tasks directly
- Always confirm actions to the user after tool execution
- If a tool fails, explain the error in user-friendly terms and continue with other operations
- When listing tasks, present them in a clear, readable format
- If you need a task_id to complete, update or delete, first list the tasks to find the correct ID
- For multi-step operations, continue even if one step fails and aggregate all results at the end

**Tone and Style:**
- Be conversational and friendly
- Use natural language and avoid technical jargon
- Confirm successful actions clearly
- When handling multiple operations, provide clear summaries (e.g., "Deleted 3 tasks. 7 tasks remaining.")
"#;

/// One request's worth of model input. History is already windowed.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    system: String,
    history: Vec<Message>,
    user: String,
}

impl Prompt {
    /// Keep only the last [`HISTORY_WINDOW`] history messages, in order.
    pub fn assemble(
        system: impl Into<String>,
        history: &[Message],
        user_message: impl Into<String>,
    ) -> Self {
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        Self {
            system: system.into(),
            history: history[start..].to_vec(),
            user: user_message.into(),
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn user_message(&self) -> &str {
        &self.user
    }

    /// Flattened form for plain text-generation endpoints.
    pub fn linear(&self) -> String {
        let mut parts = Vec::with_capacity(self.history.len() + 2);
        parts.push(self.system.clone());
        for message in &self.history {
            parts.push(format!("{}: {}", message.role.label(), message.content));
        }
        parts.push(format!("{}: {}", Role::User.label(), self.user));
        parts.join("\n\n")
    }

    /// Structured form for chat endpoints.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(Message::system(self.system.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(Message::user(self.user.clone()));
        messages
    }
}
