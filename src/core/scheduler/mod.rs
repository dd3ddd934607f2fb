//! Recurring task execution.
//!
//! [`TaskScheduler`] keeps the engine's triggers in step with the task
//! store: every create/update/delete goes through [`TaskScheduler::sync_task`]
//! or [`TaskScheduler::remove_task`], startup goes through
//! [`TaskScheduler::reconcile`].

pub mod compiler;
pub mod engine;
pub mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::lifecycle::LifecycleComponent;
use crate::core::store::{RunTrigger, ScheduledTask, TaskStore};
use compiler::{ScheduleZone, compile_task};
use engine::{FireHandler, FireOutcome, SchedulerEngine};
use pipeline::ExecutionPipeline;

/// Acknowledgement returned by run-now. Says nothing about the run's outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunNowAck {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    pub scheduled: usize,
    pub inactive: usize,
    pub failed: Vec<(String, String)>,
}

/// Bridges engine firings to the pipeline.
struct ScheduledFire {
    store: Arc<dyn TaskStore>,
    pipeline: Arc<ExecutionPipeline>,
}

#[async_trait]
impl FireHandler for ScheduledFire {
    async fn on_fire(&self, task_id: String, next_fire: Option<DateTime<Utc>>) -> FireOutcome {
        match self.store.get(&task_id).await {
            Some(task) if task.is_active => {}
            Some(_) => {
                info!("Ignoring fire for inactive task {}", task_id);
                return FireOutcome::Keep;
            }
            None => {
                info!("Ignoring fire for deleted task {}", task_id);
                return FireOutcome::Discard;
            }
        }
        if let Err(e) = self.store.set_schedule(&task_id, next_fire, None).await {
            warn!("Could not update next run of task {}: {}", task_id, e);
        }
        self.pipeline.run(&task_id, RunTrigger::Scheduled).await;
        FireOutcome::Keep
    }
}

pub struct TaskScheduler {
    engine: Arc<SchedulerEngine>,
    store: Arc<dyn TaskStore>,
    pipeline: Arc<ExecutionPipeline>,
    sync_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        pipeline: Arc<ExecutionPipeline>,
        zone: ScheduleZone,
        max_sleep: Duration,
    ) -> Self {
        let handler = Arc::new(ScheduledFire {
            store: store.clone(),
            pipeline: pipeline.clone(),
        });
        Self {
            engine: Arc::new(SchedulerEngine::new(zone, max_sleep, handler)),
            store,
            pipeline,
            sync_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<SchedulerEngine> {
        &self.engine
    }

    async fn sync_lock(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.sync_locks.lock().await;
        locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Bring the engine's trigger for `task_id` in line with the stored
    /// record. Syncs of one id are serialized and always read the store, so
    /// the last sync reflects the last edit. Compile failures leave the task
    /// unscheduled with `schedule_error` set. Returns the stored record, or
    /// `None` once the task is gone.
    pub async fn sync_task(&self, task_id: &str) -> Option<ScheduledTask> {
        let lock = self.sync_lock(task_id).await;
        let guard = lock.lock().await;
        let Some(task) = self.store.get(task_id).await else {
            self.engine.unregister(task_id).await;
            drop(guard);
            self.sync_locks.lock().await.remove(task_id);
            return None;
        };
        let (next, error) = if !task.is_active {
            self.engine.unregister(&task.id).await;
            (None, None)
        } else {
            match compile_task(&task) {
                Ok(rule) => (self.engine.register(&task.id, rule).await, None),
                Err(e) => {
                    warn!("Task {} left unscheduled: {}", task.id, e);
                    self.engine.unregister(&task.id).await;
                    (None, Some(e.to_string()))
                }
            }
        };
        match self.store.set_schedule(&task.id, next, error).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("Task {} vanished while scheduling: {}", task.id, e);
                self.engine.unregister(&task.id).await;
                drop(guard);
                self.sync_locks.lock().await.remove(task_id);
                None
            }
        }
    }

    /// Drop the trigger and locks of a task already deleted from the store.
    pub async fn remove_task(&self, task_id: &str) {
        let lock = self.sync_lock(task_id).await;
        {
            let _guard = lock.lock().await;
            if self.engine.unregister(task_id).await {
                info!("Removed schedule for task {}", task_id);
            }
        }
        self.sync_locks.lock().await.remove(task_id);
        self.pipeline.forget(task_id).await;
    }

    /// Register every active task in the store. Compile failures are
    /// reported, never fatal.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for task in self.store.list().await {
            if !task.is_active {
                report.inactive += 1;
                continue;
            }
            match self.sync_task(&task.id).await {
                Some(stored) if stored.schedule_error.is_none() => report.scheduled += 1,
                Some(stored) => report
                    .failed
                    .push((stored.id, stored.schedule_error.unwrap_or_default())),
                None => {}
            }
        }
        info!(
            "Reconciled schedules: {} scheduled, {} inactive, {} failed",
            report.scheduled,
            report.inactive,
            report.failed.len()
        );
        report
    }

    /// Start a run in the background and acknowledge immediately.
    pub async fn run_now(&self, task_id: &str) -> RunNowAck {
        if self.store.get(task_id).await.is_none() {
            return RunNowAck {
                success: false,
                message: "Task not found".to_string(),
            };
        }
        let pipeline = self.pipeline.clone();
        let id = task_id.to_string();
        tokio::spawn(async move {
            pipeline.run(&id, RunTrigger::Manual).await;
        });
        RunNowAck {
            success: true,
            message: "Task execution started".to_string(),
        }
    }

    pub async fn start(&self) {
        self.engine.start().await;
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

/// Lifecycle wrapper: reconcile and arm the loop on start, stop it on shutdown.
pub struct SchedulerService {
    scheduler: Arc<TaskScheduler>,
}

impl SchedulerService {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl LifecycleComponent for SchedulerService {
    fn name(&self) -> &str {
        "scheduler"
    }

    async fn on_start(&mut self) -> anyhow::Result<()> {
        let report = self.scheduler.reconcile().await;
        for (task_id, error) in &report.failed {
            warn!("Task {} not scheduled: {}", task_id, error);
        }
        self.scheduler.start().await;
        Ok(())
    }

    async fn on_shutdown(&mut self) -> anyhow::Result<()> {
        info!("Stopping scheduler loop...");
        self.scheduler.shutdown().await;
        Ok(())
    }
}
