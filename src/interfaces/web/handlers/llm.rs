use axum::{Json, extract::State};

use super::super::AppState;
use crate::core::llm::{GatewayReply, InvokeRequest};

pub async fn invoke_llm(
    State(state): State<AppState>,
    Json(payload): Json<InvokeRequest>,
) -> Json<GatewayReply> {
    Json(state.gateway.invoke(&payload).await)
}
