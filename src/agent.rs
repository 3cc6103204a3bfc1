use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::executor::ToolExecutor;
use crate::interpreter::RuleInterpreter;
use crate::llm::{build_model, LanguageModel, ModelReply};
use crate::message::Message;
use crate::prompt::{Prompt, SYSTEM_PROMPT};
use crate::store::{CallerId, TaskStore};
use crate::tool::{ToolInvocation, ToolRegistry};
use crate::toolkit::task_toolkit;

/// Last-resort reply when neither the model nor a fallback rule can answer.
pub const UNAVAILABLE_REPLY: &str = "The AI assistant is temporarily unavailable.";

/// What one processed message produced: the reply and every tool call made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
}

impl AgentResponse {
    pub fn unavailable() -> Self {
        Self {
            content: UNAVAILABLE_REPLY.to_string(),
            tool_calls: Vec::new(),
        }
    }
}

/// Conversational task assistant.
///
/// Each message climbs a fixed ladder: the configured model (whose chat call
/// already retries once through text generation), then the rule-based
/// interpreter. Without a model the interpreter answers directly.
pub struct TaskAgent {
    system_prompt: String,
    tools: Arc<ToolRegistry>,
    model: Option<Arc<dyn LanguageModel>>,
    rules: RuleInterpreter,
}

impl TaskAgent {
    pub fn new(model: Option<Arc<dyn LanguageModel>>) -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            tools: Arc::new(task_toolkit()),
            model,
            rules: RuleInterpreter::new(),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(build_model(&cfg.model))
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Produce a reply for `user_message`. Every failure ends in a
    /// well-formed response; nothing is returned as an error.
    pub async fn process_message(
        &self,
        user_message: &str,
        history: &[Message],
        caller: CallerId,
        store: &dyn TaskStore,
    ) -> AgentResponse {
        let executor = ToolExecutor::new(self.tools.clone(), store, caller);

        let Some(model) = &self.model else {
            warn!(%caller, "no language model configured, using rule-based interpreter");
            return self.rules.respond(user_message, &executor).await;
        };

        let prompt = Prompt::assemble(self.system_prompt.as_str(), history, user_message);
        match model.generate(&prompt, &self.tools.describe()).await {
            Ok(reply) => {
                info!(
                    provider = model.name(),
                    %caller,
                    tool_calls = reply.tool_calls.len(),
                    "model reply received"
                );
                self.apply(reply, &executor).await
            }
            Err(err) => {
                error!(
                    provider = model.name(),
                    %caller,
                    error = %err,
                    "language model failed, falling back to rule-based interpreter"
                );
                self.rules.respond(user_message, &executor).await
            }
        }
    }

    /// Run the model's tool calls in order; a failing call does not stop the rest.
    async fn apply(&self, reply: ModelReply, executor: &ToolExecutor<'_>) -> AgentResponse {
        let mut tool_calls = Vec::with_capacity(reply.tool_calls.len());
        for call in &reply.tool_calls {
            tool_calls.push(executor.invoke(&call.name, call.parameters()).await);
        }
        AgentResponse {
            content: ModelReply::user_facing(&reply.content),
            tool_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::executor::ToolError;
    use crate::llm::{StubModel, DEFAULT_REPLY};
    use crate::message::ToolCall;
    use crate::store::InMemoryTaskStore;
    use crate::tool::{Tool, ToolContext, ToolDefinition};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    struct TwoCalls;

    #[async_trait]
    impl LanguageModel for TwoCalls {
        fn name(&self) -> &str {
            "two-calls"
        }

        async fn generate(&self, _: &Prompt, tools: &[ToolDefinition]) -> Result<ModelReply> {
            assert_eq!(tools.len(), 5);
            Ok(ModelReply::new(
                "Done.",
                vec![
                    ToolCall {
                        id: Some("a".into()),
                        name: "archive_task".into(),
                        arguments: json!({}),
                    },
                    ToolCall {
                        id: Some("b".into()),
                        name: "add_task".into(),
                        arguments: json!("{\"title\":\"Call the bank\"}"),
                    },
                ],
            ))
        }
    }

    #[tokio::test]
    async fn executes_model_tool_calls_in_order() {
        let store = InMemoryTaskStore::new();
        let caller = CallerId::new_v4();
        let agent = TaskAgent::new(Some(Arc::new(TwoCalls)));

        let response = agent.process_message("bank", &[], caller, &store).await;

        assert_eq!(response.content, "Done.");
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(
            response.tool_calls[0].result.error(),
            Some("Unknown tool: archive_task")
        );
        assert!(response.tool_calls[1].result.is_success());
        let listing = store.list_tasks(caller, None, 1, 20).await.unwrap();
        assert_eq!(listing.tasks[0].title, "Call the bank");
    }

    #[tokio::test]
    async fn stubbed_model_replies_are_repeatable() {
        let store = InMemoryTaskStore::new();
        let caller = CallerId::new_v4();
        let agent = TaskAgent::new(Some(StubModel::always(
            r#"{"action":"respond","content":"  You have no tasks yet.  "}"#,
        )));
        let history = vec![Message::user("hi"), Message::assistant("hello")];

        let first = agent.process_message("what's up?", &history, caller, &store).await;
        let second = agent.process_message("what's up?", &history, caller, &store).await;

        assert_eq!(first.content, "You have no tasks yet.");
        assert_eq!(first.content, second.content);
        assert!(first.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn failing_model_hands_over_to_rules() {
        let store = InMemoryTaskStore::new();
        let caller = CallerId::new_v4();
        let agent = TaskAgent::new(Some(StubModel::new(vec![])));

        let response = agent
            .process_message("Add a task to buy milk", &[], caller, &store)
            .await;

        assert_eq!(
            response.content,
            "I've added 'Add a task to buy milk' to your task list."
        );
        assert_eq!(response.tool_calls[0].tool, "add_task");
    }

    #[tokio::test]
    async fn missing_model_goes_straight_to_rules() {
        let store = InMemoryTaskStore::new();
        let agent = TaskAgent::new(None);
        assert!(!agent.has_model());

        let response = agent
            .process_message("good morning", &[], CallerId::new_v4(), &store)
            .await;

        assert_eq!(response, AgentResponse::unavailable());
    }

    /// Returns a fixed reply and remembers what it was asked.
    struct Scripted {
        reply: ModelReply,
        seen: std::sync::Mutex<Vec<(String, String, usize)>>,
    }

    impl Scripted {
        fn new(reply: ModelReply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &Prompt, tools: &[ToolDefinition]) -> Result<ModelReply> {
            self.seen.lock().unwrap().push((
                prompt.system().to_string(),
                prompt.user_message().to_string(),
                tools.len(),
            ));
            Ok(self.reply.clone())
        }
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Returns its input"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn call(
            &self,
            _ctx: &ToolContext<'_>,
            input: &Map<String, Value>,
        ) -> std::result::Result<Value, ToolError> {
            Ok(Value::Object(input.clone()))
        }
    }

    #[tokio::test]
    async fn hand_built_empty_replies_get_the_default_text() {
        let store = InMemoryTaskStore::new();
        for raw in ["", "  \n\t "] {
            let model = Scripted::new(ModelReply {
                content: raw.to_string(),
                tool_calls: Vec::new(),
            });
            let agent = TaskAgent::new(Some(model));

            let response = agent
                .process_message("hi", &[], CallerId::new_v4(), &store)
                .await;

            assert_eq!(response.content, DEFAULT_REPLY);
        }
    }

    #[tokio::test]
    async fn custom_prompt_and_tools_reach_the_model() {
        let store = InMemoryTaskStore::new();
        let model = Scripted::new(ModelReply {
            content: " pong ".into(),
            tool_calls: vec![ToolCall {
                id: None,
                name: "echo".into(),
                arguments: json!({"word": "ping"}),
            }],
        });
        let mut tools = ToolRegistry::new();
        tools.register(Echo);
        let agent = TaskAgent::new(Some(model.clone()))
            .with_system_prompt("Be brief.")
            .with_tools(tools);

        let response = agent
            .process_message("ping", &[], CallerId::new_v4(), &store)
            .await;

        assert_eq!(response.content, "pong");
        assert_eq!(
            response.tool_calls[0].result.payload().unwrap()["word"],
            json!("ping")
        );
        assert_eq!(
            model.seen.lock().unwrap()[0],
            ("Be brief.".to_string(), "ping".to_string(), 1)
        );
    }
}
