//! One task run, start to finish.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::llm::{InvokeRequest, LlmGateway, ReplyOrigin};
use crate::core::store::{
    Activity, ActivityLog, Agent, Collection, RunStatus, RunTrigger, ScheduledTask, StoreError,
    TaskStore,
};

const SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub task_id: String,
    pub status: RunStatus,
    pub output: String,
}

pub struct ExecutionPipeline {
    store: Arc<dyn TaskStore>,
    gateway: Arc<LlmGateway>,
    agents: Arc<Collection<Agent>>,
    activity: Arc<ActivityLog>,
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ExecutionPipeline {
    pub fn new(
        store: Arc<dyn TaskStore>,
        gateway: Arc<LlmGateway>,
        agents: Arc<Collection<Agent>>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        Self {
            store,
            gateway,
            agents,
            activity,
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().await;
        locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the run lock of a deleted task.
    pub async fn forget(&self, task_id: &str) {
        self.run_locks.lock().await.remove(task_id);
    }

    /// Run `task_id` through `running` to a terminal status. Unknown ids are
    /// a no-op. Never returns an error: every failure ends as `failed`.
    pub async fn run(&self, task_id: &str, trigger: RunTrigger) -> Option<RunOutcome> {
        let lock = self.lock_for(task_id).await;
        let guard = lock.lock().await;

        let task = match self.store.transition(task_id, RunStatus::Running, None).await {
            Ok(task) => task,
            Err(e) => {
                warn!("Skipping run of task {}: {}", task_id, e);
                if matches!(e, StoreError::NotFound(_)) {
                    drop(guard);
                    self.forget(task_id).await;
                }
                return None;
            }
        };
        info!(
            "Running task {} ({}) [{:?}]",
            task.task_name, task.id, trigger
        );

        let (status, output) = self.execute(&task).await;

        if let Err(e) = self
            .store
            .transition(task_id, status, Some(output.clone()))
            .await
        {
            // Deleted mid-run; nothing left to record on.
            warn!("Could not record outcome of task {}: {}", task_id, e);
        }
        info!("Task {} finished: {}", task.id, status.as_str());

        self.activity
            .record(Activity {
                id: uuid::Uuid::new_v4().to_string(),
                activity_type: "task_run".to_string(),
                task_id: task.id.clone(),
                task_name: task.task_name.clone(),
                agent_id: task.agent_id.clone(),
                trigger,
                status,
                summary: output.chars().take(SUMMARY_CHARS).collect(),
                created_date: Utc::now(),
            })
            .await;

        Some(RunOutcome {
            task_id: task.id,
            status,
            output,
        })
    }

    async fn execute(&self, task: &ScheduledTask) -> (RunStatus, String) {
        if !task.is_prompt_workflow() {
            info!(
                "Task {} has workflow type '{}' with no action, marking success",
                task.id, task.workflow_type
            );
            return (RunStatus::Success, String::new());
        }

        let agent = self.agents.get(&task.agent_id).await;
        let request = InvokeRequest {
            prompt: task.workflow_definition.clone(),
            tools: task.tools_to_use.clone(),
            system_prompt: agent.as_ref().and_then(|a| a.system_prompt.clone()),
            temperature: agent.as_ref().and_then(|a| a.temperature),
        };

        let reply = self.gateway.invoke(&request).await;
        match reply.origin {
            ReplyOrigin::Provider | ReplyOrigin::Unconfigured => (RunStatus::Success, reply.response),
            ReplyOrigin::Fallback { error } => {
                warn!("Task {} failed: {}", task.id, error);
                (RunStatus::Failed, format!("{}\n\nerror: {}", reply.response, error))
            }
        }
    }
}
