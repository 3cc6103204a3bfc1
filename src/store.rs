//! Contract for the task store the agent drives, plus an in-memory
//! implementation for development and testing.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type TaskId = Uuid;

const MAX_TITLE_CHARS: usize = 255;
const MAX_PAGE_SIZE: u32 = 100;

/// Identity of the user whose tasks are being manipulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerId(pub Uuid);

impl CallerId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<TaskRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub id: TaskId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task `{0}` not found")]
    NotFound(TaskId),

    #[error("task `{0}` belongs to another user")]
    Forbidden(TaskId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Short sentence safe to show to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "I couldn't find the task you're looking for.",
            StoreError::Forbidden(_) => "I don't see that task in your list.",
            StoreError::Validation(_) => "That doesn't seem right. Can you try again?",
            StoreError::Unavailable(_) => {
                "I'm having trouble reaching the database. Please try again in a moment."
            }
        }
    }
}

/// Per-caller CRUD operations over tasks. Every call is scoped to `caller`;
/// implementations must never let one caller address another caller's tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(
        &self,
        caller: CallerId,
        title: &str,
        description: Option<&str>,
    ) -> Result<TaskRecord, StoreError>;

    async fn list_tasks(
        &self,
        caller: CallerId,
        completed: Option<bool>,
        page: u32,
        page_size: u32,
    ) -> Result<TaskPage, StoreError>;

    async fn complete_task(&self, caller: CallerId, id: TaskId) -> Result<TaskRecord, StoreError>;

    async fn update_task(
        &self,
        caller: CallerId,
        id: TaskId,
        update: TaskUpdate,
    ) -> Result<TaskRecord, StoreError>;

    async fn delete_task(&self, caller: CallerId, id: TaskId) -> Result<DeleteOutcome, StoreError>;
}

/// In-memory implementation for development and testing.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    order: RwLock<Vec<TaskId>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_title(title: &str) -> Result<String, StoreError> {
        let trimmed = title.trim();
        let chars = trimmed.chars().count();
        if chars == 0 || chars > MAX_TITLE_CHARS {
            return Err(StoreError::Validation(format!(
                "title must be 1-{MAX_TITLE_CHARS} characters, got {chars}"
            )));
        }
        Ok(trimmed.to_string())
    }

    fn owned<'a>(
        tasks: &'a mut HashMap<TaskId, TaskRecord>,
        caller: CallerId,
        id: TaskId,
    ) -> Result<&'a mut TaskRecord, StoreError> {
        let task = tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if task.user_id != caller.0 {
            return Err(StoreError::Forbidden(id));
        }
        Ok(task)
    }
}

fn poisoned<E: fmt::Display>(err: E) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(
        &self,
        caller: CallerId,
        title: &str,
        description: Option<&str>,
    ) -> Result<TaskRecord, StoreError> {
        let title = Self::validate_title(title)?;
        let now = Utc::now();
        let record = TaskRecord {
            id: Uuid::new_v4(),
            user_id: caller.0,
            title,
            description: description.map(str::to_string),
            is_completed: false,
            created_at: now,
            updated_at: now,
        };

        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let mut order = self.order.write().map_err(poisoned)?;
        tasks.insert(record.id, record.clone());
        order.push(record.id);
        Ok(record)
    }

    async fn list_tasks(
        &self,
        caller: CallerId,
        completed: Option<bool>,
        page: u32,
        page_size: u32,
    ) -> Result<TaskPage, StoreError> {
        if page == 0 {
            return Err(StoreError::Validation("page must be at least 1".into()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(StoreError::Validation(format!(
                "page_size must be 1-{MAX_PAGE_SIZE}"
            )));
        }

        let tasks = self.tasks.read().map_err(poisoned)?;
        let order = self.order.read().map_err(poisoned)?;
        let matching: Vec<&TaskRecord> = order
            .iter()
            .filter_map(|id| tasks.get(id))
            .filter(|task| task.user_id == caller.0)
            .filter(|task| completed.map_or(true, |wanted| task.is_completed == wanted))
            .collect();

        let offset = (page as usize - 1).saturating_mul(page_size as usize);
        Ok(TaskPage {
            tasks: matching
                .iter()
                .skip(offset)
                .take(page_size as usize)
                .map(|task| (*task).clone())
                .collect(),
            total: matching.len() as u64,
            page,
            page_size,
        })
    }

    async fn complete_task(&self, caller: CallerId, id: TaskId) -> Result<TaskRecord, StoreError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let task = Self::owned(&mut tasks, caller, id)?;
        task.is_completed = true;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn update_task(
        &self,
        caller: CallerId,
        id: TaskId,
        update: TaskUpdate,
    ) -> Result<TaskRecord, StoreError> {
        let title = update
            .title
            .as_deref()
            .map(Self::validate_title)
            .transpose()?;

        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let task = Self::owned(&mut tasks, caller, id)?;
        if let Some(title) = title {
            task.title = title;
        }
        if let Some(description) = update.description {
            task.description = Some(description);
        }
        if let Some(done) = update.is_completed {
            task.is_completed = done;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete_task(&self, caller: CallerId, id: TaskId) -> Result<DeleteOutcome, StoreError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        Self::owned(&mut tasks, caller, id)?;
        tasks.remove(&id);
        self.order.write().map_err(poisoned)?.retain(|existing| *existing != id);
        Ok(DeleteOutcome { success: true, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn isolates_callers() {
        let store = InMemoryTaskStore::new();
        let alice = CallerId::new_v4();
        let bob = CallerId::new_v4();

        let task = store.create_task(alice, "Buy milk", None).await.unwrap();

        let bobs = store.list_tasks(bob, None, 1, 20).await.unwrap();
        assert_eq!(bobs.total, 0);
        assert_eq!(
            store.delete_task(bob, task.id).await,
            Err(StoreError::Forbidden(task.id))
        );
        assert_eq!(store.list_tasks(alice, None, 1, 20).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn filters_and_paginates_in_creation_order() {
        let store = InMemoryTaskStore::new();
        let caller = CallerId::new_v4();
        for i in 0..5 {
            let task = store
                .create_task(caller, &format!("task {i}"), None)
                .await
                .unwrap();
            if i % 2 == 0 {
                store.complete_task(caller, task.id).await.unwrap();
            }
        }

        let done = store.list_tasks(caller, Some(true), 1, 20).await.unwrap();
        let titles: Vec<&str> = done.tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["task 0", "task 2", "task 4"]);

        let second = store.list_tasks(caller, None, 2, 2).await.unwrap();
        assert_eq!(second.total, 5);
        assert_eq!(second.tasks[0].title, "task 2");
    }

    #[tokio::test]
    async fn rejects_invalid_input() {
        let store = InMemoryTaskStore::new();
        let caller = CallerId::new_v4();

        assert!(matches!(
            store.create_task(caller, "   ", None).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.create_task(caller, &"x".repeat(256), None).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.list_tasks(caller, None, 0, 20).await,
            Err(StoreError::Validation(_))
        ));
        let missing = Uuid::new_v4();
        assert_eq!(
            store.complete_task(caller, missing).await,
            Err(StoreError::NotFound(missing))
        );
    }
}
