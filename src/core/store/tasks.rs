use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::Collection;
use super::types::{RunStatus, ScheduledTask, ScheduledTaskInput, can_transition};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(String),
    #[error("Task {id}: illegal status transition {from:?} -> {to:?}")]
    IllegalTransition {
        id: String,
        from: RunStatus,
        to: RunStatus,
    },
}

/// Narrow read/update contract the scheduler and pipeline rely on.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<ScheduledTask>;

    async fn list(&self) -> Vec<ScheduledTask>;

    /// Insert or replace a whole record. Returns the previous version.
    async fn put(&self, task: ScheduledTask) -> Option<ScheduledTask>;

    async fn delete(&self, id: &str) -> Option<ScheduledTask>;

    /// Apply user edits in a single write, leaving run bookkeeping intact.
    /// Returns `(before, after)`.
    async fn edit(
        &self,
        id: &str,
        input: ScheduledTaskInput,
    ) -> Result<(ScheduledTask, ScheduledTask), StoreError>;

    /// Move a task along the run state machine in a single write.
    /// Terminal transitions also stamp `last_run_at` and `last_run_output`.
    async fn transition(
        &self,
        id: &str,
        to: RunStatus,
        output: Option<String>,
    ) -> Result<ScheduledTask, StoreError>;

    /// Record what the scheduler currently holds for this task.
    async fn set_schedule(
        &self,
        id: &str,
        next_run_at: Option<DateTime<Utc>>,
        schedule_error: Option<String>,
    ) -> Result<ScheduledTask, StoreError>;
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Collection<ScheduledTask>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, id: &str) -> Option<ScheduledTask> {
        self.tasks.get(id).await
    }

    async fn list(&self) -> Vec<ScheduledTask> {
        let mut tasks = self.tasks.list().await;
        tasks.sort_by(|a, b| a.created_date.cmp(&b.created_date));
        tasks
    }

    async fn put(&self, task: ScheduledTask) -> Option<ScheduledTask> {
        let id = task.id.clone();
        self.tasks.put(&id, task).await
    }

    async fn delete(&self, id: &str) -> Option<ScheduledTask> {
        self.tasks.delete(id).await
    }

    async fn edit(
        &self,
        id: &str,
        input: ScheduledTaskInput,
    ) -> Result<(ScheduledTask, ScheduledTask), StoreError> {
        let mut before = None;
        let after = self
            .tasks
            .update(id, |task| {
                before = Some(task.clone());
                task.apply(input);
            })
            .await;
        match (before, after) {
            (Some(before), Some(after)) => Ok((before, after)),
            _ => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn transition(
        &self,
        id: &str,
        to: RunStatus,
        output: Option<String>,
    ) -> Result<ScheduledTask, StoreError> {
        let mut illegal = None;
        let updated = self
            .tasks
            .update(id, |task| {
                let from = task.last_run_status;
                if !can_transition(from, to) {
                    illegal = Some(from);
                    return;
                }
                let now = Utc::now();
                task.last_run_status = to;
                task.updated_date = now;
                if to.is_terminal() {
                    task.last_run_at = Some(now);
                    task.last_run_output = output;
                }
            })
            .await
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Some(from) = illegal {
            warn!(
                "Refusing status change of task {} from {} to {}",
                id,
                from.as_str(),
                to.as_str()
            );
            return Err(StoreError::IllegalTransition {
                id: id.to_string(),
                from,
                to,
            });
        }
        Ok(updated)
    }

    async fn set_schedule(
        &self,
        id: &str,
        next_run_at: Option<DateTime<Utc>>,
        schedule_error: Option<String>,
    ) -> Result<ScheduledTask, StoreError> {
        self.tasks
            .update(id, |task| {
                task.next_run_at = next_run_at;
                task.schedule_error = schedule_error;
                task.updated_date = Utc::now();
            })
            .await
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
