use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::AppState;
use super::handlers::{agents, customers, google, llm, system, tasks};

fn build_cors(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/auth/me", get(system::auth_me))
        .route(
            "/agents",
            get(agents::list_agents).post(agents::create_agent),
        )
        .route(
            "/agents/{agent_id}",
            get(agents::get_agent)
                .put(agents::update_agent)
                .delete(agents::delete_agent),
        )
        .route(
            "/customers",
            get(customers::list_customers).post(customers::create_customer),
        )
        .route("/customers/search", post(customers::search_customers))
        .route(
            "/customers/{customer_id}",
            get(customers::get_customer)
                .put(customers::update_customer)
                .delete(customers::delete_customer),
        )
        .route(
            "/scheduled-tasks",
            get(tasks::list_tasks).post(tasks::create_task),
        )
        .route("/scheduled-tasks/run", post(tasks::run_task))
        .route(
            "/scheduled-tasks/{task_id}",
            get(tasks::get_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/activities", get(system::list_activities))
        .route("/invoke-llm", post(llm::invoke_llm))
        .route("/google/oauth", post(google::oauth))
        .route("/google/gmail", post(google::gmail))
        .route("/google/calendar", post(google::calendar))
        .route("/google/drive", post(google::drive))
        .route("/google/sheets", post(google::sheets))
        .route("/google/docs", post(google::docs))
        .route("/logs/stream", get(system::sse_logs))
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors(&state.cors_origins))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
