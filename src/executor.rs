//! Runs named tools against the task store on behalf of one caller and
//! folds every outcome into a [`ToolResult`].

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{CallerId, StoreError, TaskStore};
use crate::tool::{ToolContext, ToolInvocation, ToolRegistry, ToolResult};
use crate::toolkit::task_toolkit;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{param} is required for {tool}")]
    MissingParameter { tool: String, param: &'static str },

    #[error("invalid `{param}`: {reason}")]
    InvalidParameter { param: &'static str, reason: String },

    #[error("invalid task_id `{0}`")]
    InvalidTaskId(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode tool result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ToolError {
    /// Text placed in the `Failure` payload. Store errors are replaced by a
    /// friendly sentence; the technical detail only goes to the log.
    fn failure_text(&self) -> String {
        match self {
            ToolError::Store(err) => err.user_message().to_string(),
            other => other.to_string(),
        }
    }
}

/// Executes tools for a single caller against a single store session.
pub struct ToolExecutor<'a> {
    registry: Arc<ToolRegistry>,
    store: &'a dyn TaskStore,
    caller: CallerId,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(registry: Arc<ToolRegistry>, store: &'a dyn TaskStore, caller: CallerId) -> Self {
        Self {
            registry,
            store,
            caller,
        }
    }

    /// Executor over the standard task toolkit.
    pub fn for_tasks(store: &'a dyn TaskStore, caller: CallerId) -> Self {
        Self::new(Arc::new(task_toolkit()), store, caller)
    }

    pub fn caller(&self) -> CallerId {
        self.caller
    }

    pub async fn execute(&self, tool: &str, parameters: &Map<String, Value>) -> ToolResult {
        let shown = Value::Object(parameters.clone());
        info!(tool, caller = %self.caller, parameters = %shown, "executing tool");

        match self.dispatch(tool, parameters).await {
            Ok(Value::Object(payload)) => {
                info!(tool, caller = %self.caller, "tool succeeded");
                ToolResult::Success(payload)
            }
            Ok(other) => {
                info!(tool, caller = %self.caller, "tool succeeded");
                let mut payload = Map::new();
                payload.insert("result".into(), other);
                ToolResult::Success(payload)
            }
            Err(err) => {
                warn!(tool, caller = %self.caller, error = %err, "tool execution failed");
                ToolResult::failure(err.failure_text())
            }
        }
    }

    /// Execute and package the outcome as an audit record.
    pub async fn invoke(&self, tool: &str, parameters: Map<String, Value>) -> ToolInvocation {
        let result = self.execute(tool, &parameters).await;
        ToolInvocation {
            tool: tool.to_string(),
            parameters,
            result,
        }
    }

    async fn dispatch(&self, tool: &str, parameters: &Map<String, Value>) -> Result<Value, ToolError> {
        let handler = self
            .registry
            .get(tool)
            .ok_or_else(|| ToolError::UnknownTool(tool.to_string()))?;
        let ctx = ToolContext {
            store: self.store,
            caller: self.caller,
        };
        handler.call(&ctx, parameters).await
    }
}
