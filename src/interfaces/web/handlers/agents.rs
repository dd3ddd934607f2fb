use axum::{
    Json,
    extract::{Path, State},
};

use super::super::{ApiError, AppState};
use crate::core::store::{Agent, AgentInput};

pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<Agent>> {
    let mut agents = state.agents.list().await;
    agents.sort_by(|a, b| a.created_date.cmp(&b.created_date));
    Json(agents)
}

pub async fn get_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Agent>, ApiError> {
    state
        .agents
        .get(&agent_id)
        .await
        .map(Json)
        .ok_or(ApiError::AgentNotFound)
}

pub async fn create_agent(
    State(state): State<AppState>,
    Json(payload): Json<AgentInput>,
) -> Json<Agent> {
    let agent = Agent::create(payload);
    state.agents.put(&agent.id, agent.clone()).await;
    tracing::info!("Created agent {} ({})", agent.name, agent.id);
    Json(agent)
}

pub async fn update_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<AgentInput>,
) -> Result<Json<Agent>, ApiError> {
    state
        .agents
        .update(&agent_id, |agent| agent.apply(payload))
        .await
        .map(Json)
        .ok_or(ApiError::AgentNotFound)
}

pub async fn delete_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    if state.agents.delete(&agent_id).await.is_some() {
        tracing::info!("Deleted agent {}", agent_id);
    }
    Json(serde_json::json!({ "success": true }))
}
