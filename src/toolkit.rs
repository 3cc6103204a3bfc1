use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::executor::ToolError;
use crate::store::{TaskId, TaskUpdate};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolRegistry};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// The five task tools, in the order they are advertised.
pub fn task_toolkit() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(AddTaskTool);
    registry.register(ListTasksTool);
    registry.register(CompleteTaskTool);
    registry.register(UpdateTaskTool);
    registry.register(DeleteTaskTool);
    registry
}

/// Definitions of the task tools, for providers with native tool calling.
pub fn task_tools() -> Vec<ToolDefinition> {
    task_toolkit().describe()
}

struct AddTaskTool;

#[async_trait]
impl Tool for AddTaskTool {
    fn name(&self) -> &str {
        "add_task"
    }

    fn description(&self) -> &str {
        "Create a new task for the user"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Task title (1-255 characters)"},
                "description": {"type": "string", "description": "Optional task description"}
            },
            "required": ["title"]
        })
    }

    async fn call(
        &self,
        ctx: &ToolContext<'_>,
        input: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let title = required_text(input, "title", self.name())?;
        let description = optional_text(input, "description")?;
        let record = ctx
            .store
            .create_task(ctx.caller, title, description)
            .await?;
        to_payload(&record)
    }
}

struct ListTasksTool;

#[async_trait]
impl Tool for ListTasksTool {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "Retrieve user's tasks with optional filtering and pagination"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "completed": {
                    "type": "boolean",
                    "description": "Filter by completion status (true for completed, false for incomplete, omit for all)"
                },
                "page": {"type": "integer", "description": "Page number (default: 1)"},
                "page_size": {"type": "integer", "description": "Items per page (1-100, default: 20)"}
            },
            "required": []
        })
    }

    async fn call(
        &self,
        ctx: &ToolContext<'_>,
        input: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let completed = optional_flag(input, "completed")?;
        let page = optional_count(input, "page")?.unwrap_or(DEFAULT_PAGE);
        let page_size = optional_count(input, "page_size")?.unwrap_or(DEFAULT_PAGE_SIZE);
        let listing = ctx
            .store
            .list_tasks(ctx.caller, completed, page, page_size)
            .await?;
        to_payload(&listing)
    }
}

struct CompleteTaskTool;

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn description(&self) -> &str {
        "Mark a task as completed"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {"type": "string", "description": "UUID of the task to mark as complete"}
            },
            "required": ["task_id"]
        })
    }

    async fn call(
        &self,
        ctx: &ToolContext<'_>,
        input: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let id = task_id(input, self.name())?;
        let record = ctx.store.complete_task(ctx.caller, id).await?;
        to_payload(&record)
    }
}

struct UpdateTaskTool;

#[async_trait]
impl Tool for UpdateTaskTool {
    fn name(&self) -> &str {
        "update_task"
    }

    fn description(&self) -> &str {
        "Update task title, description, or completion status"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {"type": "string", "description": "UUID of the task to update"},
                "title": {"type": "string", "description": "New task title (1-255 characters)"},
                "description": {"type": "string", "description": "New task description"},
                "is_completed": {"type": "boolean", "description": "New completion status"}
            },
            "required": ["task_id"]
        })
    }

    async fn call(
        &self,
        ctx: &ToolContext<'_>,
        input: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let id = task_id(input, self.name())?;
        let update = TaskUpdate {
            title: optional_text(input, "title")?.map(str::to_string),
            description: optional_text(input, "description")?.map(str::to_string),
            is_completed: optional_flag(input, "is_completed")?,
        };
        let record = ctx.store.update_task(ctx.caller, id, update).await?;
        to_payload(&record)
    }
}

struct DeleteTaskTool;

#[async_trait]
impl Tool for DeleteTaskTool {
    fn name(&self) -> &str {
        "delete_task"
    }

    fn description(&self) -> &str {
        "Permanently delete a task"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {"type": "string", "description": "UUID of the task to delete"}
            },
            "required": ["task_id"]
        })
    }

    async fn call(
        &self,
        ctx: &ToolContext<'_>,
        input: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let id = task_id(input, self.name())?;
        let outcome = ctx.store.delete_task(ctx.caller, id).await?;
        to_payload(&outcome)
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    Ok(serde_json::to_value(value)?)
}

fn present<'a>(input: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    input.get(key).filter(|value| !value.is_null())
}

fn required_text<'a>(
    input: &'a Map<String, Value>,
    param: &'static str,
    tool: &str,
) -> Result<&'a str, ToolError> {
    match optional_text(input, param)? {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(ToolError::MissingParameter {
            tool: tool.to_string(),
            param,
        }),
    }
}

fn optional_text<'a>(
    input: &'a Map<String, Value>,
    param: &'static str,
) -> Result<Option<&'a str>, ToolError> {
    match present(input, param) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.as_str())),
        Some(other) => Err(ToolError::InvalidParameter {
            param,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

/// Booleans may arrive as JSON booleans or as the strings "true"/"false".
fn optional_flag(input: &Map<String, Value>, param: &'static str) -> Result<Option<bool>, ToolError> {
    match present(input, param) {
        None => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(Value::String(text)) => Ok(Some(text.trim().eq_ignore_ascii_case("true"))),
        Some(other) => Err(ToolError::InvalidParameter {
            param,
            reason: format!("expected a boolean, got {other}"),
        }),
    }
}

/// Page numbers may arrive as integers or numeric strings.
fn optional_count(input: &Map<String, Value>, param: &'static str) -> Result<Option<u32>, ToolError> {
    let invalid = |shown: String| ToolError::InvalidParameter {
        param,
        reason: format!("expected a positive integer, got {shown}"),
    };
    match present(input, param) {
        None => Ok(None),
        Some(Value::Number(number)) => number
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid(number.to_string())),
        Some(Value::String(text)) => text
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| invalid(format!("`{text}`"))),
        Some(other) => Err(invalid(other.to_string())),
    }
}

fn task_id(input: &Map<String, Value>, tool: &str) -> Result<TaskId, ToolError> {
    let raw = match present(input, "task_id") {
        None => None,
        Some(Value::String(text)) if text.trim().is_empty() => None,
        Some(Value::String(text)) => Some(text.trim().to_string()),
        Some(other) => return Err(ToolError::InvalidTaskId(other.to_string())),
    };
    let raw = raw.ok_or_else(|| ToolError::MissingParameter {
        tool: tool.to_string(),
        param: "task_id",
    })?;
    Uuid::parse_str(&raw).map_err(|_| ToolError::InvalidTaskId(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CallerId, InMemoryTaskStore, TaskStore};

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn advertises_the_five_tools_in_order() {
        let names: Vec<String> = task_tools().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["add_task", "list_tasks", "complete_task", "update_task", "delete_task"]
        );

        let definitions = task_tools();
        let update = ToolDefinition::find(&definitions, "update_task").unwrap();
        assert_eq!(update.parameters["required"], json!(["task_id"]));
    }

    #[test]
    fn coerces_loose_flags_and_counts() {
        let input = params(json!({
            "completed": "TRUE",
            "is_completed": "false",
            "page": "3",
            "page_size": 50
        }));
        assert_eq!(optional_flag(&input, "completed").unwrap(), Some(true));
        assert_eq!(optional_flag(&input, "is_completed").unwrap(), Some(false));
        assert_eq!(optional_count(&input, "page").unwrap(), Some(3));
        assert_eq!(optional_count(&input, "page_size").unwrap(), Some(50));

        let bad = params(json!({"page": "two", "completed": 1}));
        assert!(optional_count(&bad, "page").is_err());
        assert!(optional_flag(&bad, "completed").is_err());
    }

    #[tokio::test]
    async fn list_defaults_to_first_page_of_twenty() {
        let store = InMemoryTaskStore::new();
        let caller = CallerId::new_v4();
        for i in 0..25 {
            store
                .create_task(caller, &format!("task {i}"), None)
                .await
                .unwrap();
        }
        let ctx = ToolContext {
            store: &store,
            caller,
        };

        let listing = ListTasksTool.call(&ctx, &Map::new()).await.unwrap();

        assert_eq!(listing["page"], json!(1));
        assert_eq!(listing["page_size"], json!(20));
        assert_eq!(listing["total"], json!(25));
        assert_eq!(listing["tasks"].as_array().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn update_applies_coerced_fields() {
        let store = InMemoryTaskStore::new();
        let caller = CallerId::new_v4();
        let task = store.create_task(caller, "Draft", None).await.unwrap();
        let ctx = ToolContext {
            store: &store,
            caller,
        };

        let updated = UpdateTaskTool
            .call(
                &ctx,
                &params(json!({
                    "task_id": task.id.to_string(),
                    "title": "Final",
                    "is_completed": "true"
                })),
            )
            .await
            .unwrap();

        assert_eq!(updated["title"], json!("Final"));
        assert_eq!(updated["is_completed"], json!(true));
    }
}
