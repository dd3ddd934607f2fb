use axum::{
    Json,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::super::AppState;
use crate::core::store::Activity;

pub async fn auth_me() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "id": "local-user", "email": "local@example.com" }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

pub async fn list_activities(State(state): State<AppState>) -> Json<Vec<Activity>> {
    Json(state.activity.list().await)
}

pub async fn sse_logs(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
