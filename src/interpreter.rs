//! Keyword-driven intent handling used when no language model answers.
//!
//! Rules are checked in a fixed priority order (delete, complete, update,
//! add, list) over the lowercased utterance; the first match wins and drives
//! the tool executor directly.

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::agent::AgentResponse;
use crate::error::{Result, TaskmateError};
use crate::executor::ToolExecutor;
use crate::store::{TaskPage, TaskRecord};
use crate::tool::ToolInvocation;

const LOOKUP_PAGE_SIZE: u32 = 100;
const MAX_TITLE_CHARS: usize = 255;
const TRUNCATED_TITLE_CHARS: usize = 252;

const UPDATE_PROMPT: &str =
    "I can update tasks. Please tell me which task and the new title/description.";
const DELETE_NOT_FOUND: &str = "I couldn't find a matching task to delete.";
const COMPLETE_NOT_FOUND: &str = "I couldn't find that task to mark as completed.";
const LIST_FAILED: &str = "I couldn't load your tasks right now.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    DeleteCompleted,
    /// Delete the first task whose title contains the phrase.
    DeleteMatching(Option<String>),
    /// Complete the first task whose title contains the phrase.
    Complete(Option<String>),
    Update,
    Add,
    List,
}

pub struct RuleInterpreter {
    delete: Regex,
    delete_target: Regex,
    complete: Regex,
    complete_target: Regex,
    update: Regex,
    add: Regex,
}

impl Default for RuleInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleInterpreter {
    pub fn new() -> Self {
        Self {
            delete: Regex::new(r"\b(delete|remove)\b").unwrap(),
            delete_target: Regex::new(r"(?:delete|remove)\s+(?:the\s+)?(.+)").unwrap(),
            complete: Regex::new(r"\b(complete|done|finish|mark)\b").unwrap(),
            complete_target: Regex::new(r"(?:complete|mark)\s+(?:the\s+)?(.+?)(?:\s+as\s+done|$)")
                .unwrap(),
            update: Regex::new(r"\b(update|change|edit)\b").unwrap(),
            add: Regex::new(r"\b(add|create|buy|remind me to|remember to)\b").unwrap(),
        }
    }

    pub fn classify(&self, message: &str) -> Option<Intent> {
        let text = message.to_lowercase();

        if self.delete.is_match(&text) {
            if text.contains("completed") {
                return Some(Intent::DeleteCompleted);
            }
            return Some(Intent::DeleteMatching(capture(&self.delete_target, &text)));
        }
        if self.complete.is_match(&text) {
            return Some(Intent::Complete(capture(&self.complete_target, &text)));
        }
        if self.update.is_match(&text) {
            return Some(Intent::Update);
        }
        if self.add.is_match(&text) {
            return Some(Intent::Add);
        }
        if text.contains("list") || text.contains("show") || text.contains("my tasks") {
            return Some(Intent::List);
        }
        None
    }

    /// Classify and run. Never fails: unmatched input and faults both yield
    /// the unavailable reply with no tool calls.
    pub async fn respond(&self, message: &str, executor: &ToolExecutor<'_>) -> AgentResponse {
        let Some(intent) = self.classify(message) else {
            info!(caller = %executor.caller(), "no fallback rule matched");
            return AgentResponse::unavailable();
        };
        info!(caller = %executor.caller(), intent = ?intent, "running fallback rule");

        match self.run(intent, message, executor).await {
            Ok(response) => response,
            Err(err) => {
                error!(caller = %executor.caller(), error = %err, "fallback interpreter failed");
                AgentResponse::unavailable()
            }
        }
    }

    pub async fn run(
        &self,
        intent: Intent,
        message: &str,
        executor: &ToolExecutor<'_>,
    ) -> Result<AgentResponse> {
        let mut log = Vec::new();
        let content = match intent {
            Intent::DeleteCompleted => delete_completed(executor, &mut log).await?,
            Intent::DeleteMatching(target) => {
                delete_matching(executor, target.as_deref(), &mut log).await?
            }
            Intent::Complete(target) => complete_matching(executor, target.as_deref(), &mut log).await?,
            Intent::Update => UPDATE_PROMPT.to_string(),
            Intent::Add => add_from_message(executor, message, &mut log).await?,
            Intent::List => list_all(executor, &mut log).await?,
        };
        Ok(AgentResponse {
            content,
            tool_calls: log,
        })
    }
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|target| !target.is_empty())
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn record(
    executor: &ToolExecutor<'_>,
    tool: &str,
    parameters: Map<String, Value>,
    log: &mut Vec<ToolInvocation>,
) -> ToolInvocation {
    let invocation = executor.invoke(tool, parameters).await;
    log.push(invocation.clone());
    invocation
}

/// Every task matching the filter, one `list_tasks` call per page.
/// `None` only when the first page could not be loaded; a later failed page
/// ends the walk with the tasks gathered so far.
async fn fetch_all(
    executor: &ToolExecutor<'_>,
    completed: Option<bool>,
    log: &mut Vec<ToolInvocation>,
) -> Result<Option<Vec<TaskRecord>>> {
    let mut tasks = Vec::new();
    let mut page = 1u32;
    loop {
        let mut parameters = params(json!({"page": page, "page_size": LOOKUP_PAGE_SIZE}));
        if let Some(flag) = completed {
            parameters.insert("completed".into(), Value::Bool(flag));
        }
        let invocation = record(executor, "list_tasks", parameters, log).await;
        let Some(payload) = invocation.result.payload() else {
            if page == 1 {
                return Ok(None);
            }
            warn!(page, loaded = tasks.len(), "task listing stopped early");
            return Ok(Some(tasks));
        };
        let listing: TaskPage = serde_json::from_value(Value::Object(payload.clone()))
            .map_err(|err| TaskmateError::Protocol(format!("unexpected list_tasks payload: {err}")))?;

        let fetched = listing.tasks.len();
        tasks.extend(listing.tasks);
        if fetched == 0 || tasks.len() as u64 >= listing.total {
            return Ok(Some(tasks));
        }
        page += 1;
    }
}

fn find_by_title<'t>(tasks: &'t [TaskRecord], target: &str) -> Option<&'t TaskRecord> {
    let target = target.to_lowercase();
    tasks
        .iter()
        .find(|task| task.title.to_lowercase().contains(&target))
}

async fn delete_completed(
    executor: &ToolExecutor<'_>,
    log: &mut Vec<ToolInvocation>,
) -> Result<String> {
    let Some(tasks) = fetch_all(executor, Some(true), log).await? else {
        return Ok(LIST_FAILED.to_string());
    };
    if tasks.is_empty() {
        return Ok("No completed tasks found to delete.".to_string());
    }

    let mut deleted = 0usize;
    for task in &tasks {
        let invocation = record(
            executor,
            "delete_task",
            params(json!({"task_id": task.id.to_string()})),
            log,
        )
        .await;
        if invocation.result.is_success() {
            deleted += 1;
        }
    }

    Ok(match deleted {
        0 => "I couldn't delete your completed tasks right now.".to_string(),
        1 => "Deleted 1 completed task.".to_string(),
        n => format!("Deleted {n} completed tasks."),
    })
}

async fn delete_matching(
    executor: &ToolExecutor<'_>,
    target: Option<&str>,
    log: &mut Vec<ToolInvocation>,
) -> Result<String> {
    let Some(target) = target else {
        return Ok(DELETE_NOT_FOUND.to_string());
    };
    let Some(tasks) = fetch_all(executor, None, log).await? else {
        return Ok(LIST_FAILED.to_string());
    };
    let Some(task) = find_by_title(&tasks, target) else {
        return Ok(DELETE_NOT_FOUND.to_string());
    };

    let invocation = record(
        executor,
        "delete_task",
        params(json!({"task_id": task.id.to_string()})),
        log,
    )
    .await;
    Ok(if invocation.result.is_success() {
        format!("Deleted '{}'.", task.title)
    } else {
        format!("I couldn't delete '{}' right now.", task.title)
    })
}

async fn complete_matching(
    executor: &ToolExecutor<'_>,
    target: Option<&str>,
    log: &mut Vec<ToolInvocation>,
) -> Result<String> {
    let Some(target) = target else {
        return Ok(COMPLETE_NOT_FOUND.to_string());
    };
    let Some(tasks) = fetch_all(executor, None, log).await? else {
        return Ok(LIST_FAILED.to_string());
    };
    let Some(task) = find_by_title(&tasks, target) else {
        return Ok(COMPLETE_NOT_FOUND.to_string());
    };

    let invocation = record(
        executor,
        "complete_task",
        params(json!({"task_id": task.id.to_string()})),
        log,
    )
    .await;
    Ok(if invocation.result.is_success() {
        format!("Marked '{}' as completed.", task.title)
    } else {
        format!("I couldn't mark '{}' as completed right now.", task.title)
    })
}

/// The whole utterance becomes the title, cut to 252 characters plus "..." when too long.
fn title_from_message(message: &str) -> String {
    let title = message.trim();
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title.to_string();
    }
    let mut truncated: String = title.chars().take(TRUNCATED_TITLE_CHARS).collect();
    truncated.push_str("...");
    truncated
}

async fn add_from_message(
    executor: &ToolExecutor<'_>,
    message: &str,
    log: &mut Vec<ToolInvocation>,
) -> Result<String> {
    let title = title_from_message(message);
    let invocation = record(executor, "add_task", params(json!({"title": title})), log).await;
    let Some(payload) = invocation.result.payload() else {
        return Ok("I couldn't add that task right now.".to_string());
    };
    let stored = payload
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| TaskmateError::Protocol("add_task payload has no title".into()))?;
    Ok(format!("I've added '{stored}' to your task list."))
}

async fn list_all(executor: &ToolExecutor<'_>, log: &mut Vec<ToolInvocation>) -> Result<String> {
    let Some(tasks) = fetch_all(executor, None, log).await? else {
        return Ok(LIST_FAILED.to_string());
    };
    if tasks.is_empty() {
        return Ok("Here are your tasks:\n(no tasks found)".to_string());
    }
    let lines: Vec<String> = tasks.iter().map(|task| format!("- {}", task.title)).collect();
    Ok(format!("Here are your tasks:\n{}", lines.join("\n")))
}
