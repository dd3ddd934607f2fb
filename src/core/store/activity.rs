use std::collections::VecDeque;

use tokio::sync::RwLock;

use super::types::Activity;

/// Number of run entries kept in memory.
const DEFAULT_ACTIVITY_LIMIT: usize = 500;

/// Bounded, newest-first record of task runs.
pub struct ActivityLog {
    entries: RwLock<VecDeque<Activity>>,
    limit: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_limit(DEFAULT_ACTIVITY_LIMIT)
    }
}

impl ActivityLog {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    pub async fn record(&self, activity: Activity) {
        let mut entries = self.entries.write().await;
        entries.push_front(activity);
        entries.truncate(self.limit);
    }

    pub async fn list(&self) -> Vec<Activity> {
        self.entries.read().await.iter().cloned().collect()
    }
}
