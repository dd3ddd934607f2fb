use axum::{
    Json,
    extract::{Path, State},
};

use super::super::{ApiError, AppState};
use crate::core::store::{Customer, CustomerInput, matches_filter};

async fn sorted_customers(state: &AppState) -> Vec<Customer> {
    let mut customers = state.customers.list().await;
    customers.sort_by(|a, b| a.created_date.cmp(&b.created_date));
    customers
}

pub async fn list_customers(State(state): State<AppState>) -> Json<Vec<Customer>> {
    Json(sorted_customers(&state).await)
}

pub async fn get_customer(
    Path(customer_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Customer>, ApiError> {
    state
        .customers
        .get(&customer_id)
        .await
        .map(Json)
        .ok_or(ApiError::CustomerNotFound)
}

pub async fn create_customer(
    State(state): State<AppState>,
    Json(payload): Json<CustomerInput>,
) -> Json<Customer> {
    let customer = Customer::create(payload);
    state.customers.put(&customer.id, customer.clone()).await;
    Json(customer)
}

pub async fn update_customer(
    Path(customer_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<CustomerInput>,
) -> Result<Json<Customer>, ApiError> {
    state
        .customers
        .update(&customer_id, |customer| customer.apply(payload))
        .await
        .map(Json)
        .ok_or(ApiError::CustomerNotFound)
}

pub async fn delete_customer(
    Path(customer_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    state.customers.delete(&customer_id).await;
    Json(serde_json::json!({ "success": true }))
}

/// Filter customers by case-insensitive substring per key; `null` values are ignored.
pub async fn search_customers(
    State(state): State<AppState>,
    Json(filter): Json<serde_json::Map<String, serde_json::Value>>,
) -> Json<Vec<Customer>> {
    let matches = sorted_customers(&state)
        .await
        .into_iter()
        .filter(|customer| {
            serde_json::to_value(customer)
                .map(|record| matches_filter(&record, &filter))
                .unwrap_or(false)
        })
        .collect();
    Json(matches)
}
