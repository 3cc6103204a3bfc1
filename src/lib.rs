//! Conversational task management.
//!
//! The crate turns a user's message into task operations:
//! - A tool catalogue for the five task operations (`ToolRegistry`, `task_toolkit`).
//! - An executor that runs tools for one caller against a `TaskStore`.
//! - Prompt assembly with a bounded history window.
//! - Language model adapters for chat and text-generation providers.
//! - A rule-based interpreter that keeps the assistant useful when no model answers.

mod agent;
mod config;
mod error;
mod executor;
mod interpreter;
mod llm;
mod message;
mod prompt;
mod store;
mod telemetry;
mod tool;
mod toolkit;

pub use agent::{AgentResponse, TaskAgent, UNAVAILABLE_REPLY};
pub use config::{
    AppConfig, GenerationMode, LogFormat, LoggingConfig, ModelConfig, ProviderConfig,
    ProviderKind, ProviderSelection, ResolvedProvider,
};
pub use error::{Result, TaskmateError};
pub use executor::{ToolError, ToolExecutor};
pub use interpreter::{Intent, RuleInterpreter};
pub use llm::{
    build_model, ChatBackend, ChatCompletionModel, ChatMessage, ChatResponse, CohereClient,
    GenerationResponse, LanguageModel, ModelReply, OpenAIClient, StubModel,
    TextGenerationBackend, TextGenerationModel, DEFAULT_REPLY,
};
pub use message::{Message, Role, ToolCall};
pub use prompt::{Prompt, HISTORY_WINDOW, SYSTEM_PROMPT};
pub use store::{
    CallerId, DeleteOutcome, InMemoryTaskStore, StoreError, TaskId, TaskPage, TaskRecord,
    TaskStore, TaskUpdate,
};
pub use telemetry::init_tracing;
pub use tool::{Tool, ToolContext, ToolDefinition, ToolInvocation, ToolRegistry, ToolResult};
pub use toolkit::{task_toolkit, task_tools, DEFAULT_PAGE, DEFAULT_PAGE_SIZE};
