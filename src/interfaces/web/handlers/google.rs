//! Canned Google Workspace actions. No Google API is contacted.

use axum::Json;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Default, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    action: Option<String>,
}

fn unknown_action() -> Json<Value> {
    Json(json!({ "success": false, "error": "Unknown action" }))
}

pub async fn oauth(Json(body): Json<ActionRequest>) -> Json<Value> {
    match body.action.as_deref() {
        Some("check_status") => Json(json!({ "connected": true })),
        _ => Json(json!({ "success": true })),
    }
}

pub async fn gmail(Json(body): Json<ActionRequest>) -> Json<Value> {
    match body.action.as_deref() {
        Some("send_email") => Json(json!({ "success": true })),
        Some("search_emails") => Json(json!({ "success": true, "emails": [] })),
        Some("read_email") => Json(json!({
            "success": true,
            "email": { "from": "", "to": "", "subject": "", "body": "" }
        })),
        _ => unknown_action(),
    }
}

pub async fn calendar(Json(body): Json<ActionRequest>) -> Json<Value> {
    match body.action.as_deref() {
        Some("create_event") => Json(json!({ "success": true })),
        Some("list_events") => Json(json!({ "success": true, "events": [] })),
        Some("check_availability") => Json(json!({ "success": true, "available": true })),
        _ => unknown_action(),
    }
}

pub async fn drive(Json(_body): Json<ActionRequest>) -> Json<Value> {
    Json(json!({ "success": true }))
}

pub async fn sheets(Json(_body): Json<ActionRequest>) -> Json<Value> {
    Json(json!({ "success": true }))
}

pub async fn docs(Json(_body): Json<ActionRequest>) -> Json<Value> {
    Json(json!({
        "success": true,
        "document": { "title": "Demo", "id": "doc-1", "url": "https://example.com", "content": "" }
    }))
}
