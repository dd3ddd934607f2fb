use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

use super::super::{ApiError, AppState};
use crate::core::scheduler::RunNowAck;
use crate::core::store::{ScheduledTask, ScheduledTaskInput};

pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<ScheduledTask>> {
    Json(state.tasks.list().await)
}

pub async fn get_task(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ScheduledTask>, ApiError> {
    state
        .tasks
        .get(&task_id)
        .await
        .map(Json)
        .ok_or(ApiError::TaskNotFound)
}

/// Create a task and register its trigger before responding. An
/// uncompilable schedule is stored with `schedule_error` set.
pub async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<ScheduledTaskInput>,
) -> Result<Json<ScheduledTask>, ApiError> {
    let task = ScheduledTask::create(payload);
    state.tasks.put(task.clone()).await;
    tracing::info!("Created scheduled task {} ({})", task.task_name, task.id);
    state
        .scheduler
        .sync_task(&task.id)
        .await
        .map(Json)
        .ok_or(ApiError::TaskNotFound)
}

pub async fn update_task(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<ScheduledTaskInput>,
) -> Result<Json<ScheduledTask>, ApiError> {
    let (before, after) = state
        .tasks
        .edit(&task_id, payload)
        .await
        .map_err(|_| ApiError::TaskNotFound)?;
    if !after.schedule_differs(&before) {
        return Ok(Json(after));
    }
    state
        .scheduler
        .sync_task(&task_id)
        .await
        .map(Json)
        .ok_or(ApiError::TaskNotFound)
}

pub async fn delete_task(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    // Record first: a sync racing this delete then finds nothing to arm.
    if state.tasks.delete(&task_id).await.is_some() {
        tracing::info!("Deleted scheduled task {}", task_id);
    }
    state.scheduler.remove_task(&task_id).await;
    Json(serde_json::json!({ "success": true }))
}

#[derive(Deserialize)]
pub struct RunTaskRequest {
    #[serde(default)]
    task_id: Option<String>,
}

/// Start a run now. The reply acknowledges the start, not the outcome.
pub async fn run_task(
    State(state): State<AppState>,
    Json(payload): Json<RunTaskRequest>,
) -> (StatusCode, Json<RunNowAck>) {
    let task_id = payload.task_id.unwrap_or_default();
    let ack = state.scheduler.run_now(&task_id).await;
    let status = if ack.success {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(ack))
}
