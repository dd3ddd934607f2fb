//! In-memory record storage.
//!
//! Agents and customers live in plain [`Collection`]s. Scheduled tasks sit
//! behind the [`TaskStore`] trait so the scheduler and pipeline never touch
//! the map directly and a durable backend can be dropped in later.

mod activity;
mod tasks;
pub mod types;

use std::collections::HashMap;

use tokio::sync::RwLock;

pub use activity::ActivityLog;
pub use tasks::{InMemoryTaskStore, StoreError, TaskStore};
pub use types::{
    Activity, Agent, AgentInput, Customer, CustomerInput, RunStatus, RunTrigger, ScheduleType,
    ScheduledTask, ScheduledTaskInput,
};

/// Id-keyed map guarded by a single async RwLock.
///
/// Every mutation runs inside one write guard, so readers observe either the
/// old or the new version of a record, never a mix.
pub struct Collection<T> {
    items: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Collection<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.items.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<T> {
        self.items.read().await.values().cloned().collect()
    }

    pub async fn put(&self, id: &str, item: T) -> Option<T> {
        self.items.write().await.insert(id.to_string(), item)
    }

    pub async fn delete(&self, id: &str) -> Option<T> {
        self.items.write().await.remove(id)
    }

    /// Mutate a record in place. Returns the updated copy, or `None` when the
    /// id is unknown (the closure is not called).
    pub async fn update<F>(&self, id: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut T),
    {
        let mut items = self.items.write().await;
        let item = items.get_mut(id)?;
        f(item);
        Some(item.clone())
    }
}

/// Case-insensitive substring filter over a record's JSON fields.
///
/// `null` filter values are ignored; every remaining key must match.
pub fn matches_filter(
    record: &serde_json::Value,
    filter: &serde_json::Map<String, serde_json::Value>,
) -> bool {
    filter.iter().all(|(key, expected)| {
        if expected.is_null() {
            return true;
        }
        let needle = json_text(expected).to_lowercase();
        let haystack = record.get(key).map(json_text).unwrap_or_default();
        haystack.to_lowercase().contains(&needle)
    })
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
