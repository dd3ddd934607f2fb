mod handlers;
pub(crate) mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::AppConfig;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::llm::LlmGateway;
use crate::core::scheduler::TaskScheduler;
use crate::core::scheduler::pipeline::ExecutionPipeline;
use crate::core::store::{ActivityLog, Agent, Collection, Customer, InMemoryTaskStore, TaskStore};

const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(3);

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) tasks: Arc<dyn TaskStore>,
    pub(crate) agents: Arc<Collection<Agent>>,
    pub(crate) customers: Arc<Collection<Customer>>,
    pub(crate) activity: Arc<ActivityLog>,
    pub(crate) scheduler: Arc<TaskScheduler>,
    pub(crate) gateway: Arc<LlmGateway>,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) cors_origins: Vec<String>,
}

impl AppState {
    /// Wire stores, gateway, pipeline and scheduler together.
    pub(crate) fn assemble(
        config: &AppConfig,
        gateway: LlmGateway,
        log_tx: broadcast::Sender<String>,
    ) -> Self {
        let tasks: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let agents = Arc::new(Collection::new());
        let activity = Arc::new(ActivityLog::default());
        let gateway = Arc::new(gateway);
        let pipeline = Arc::new(ExecutionPipeline::new(
            tasks.clone(),
            gateway.clone(),
            agents.clone(),
            activity.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            tasks.clone(),
            pipeline,
            config.scheduler.timezone,
            std::time::Duration::from_secs(config.scheduler.max_sleep_secs),
        ));
        Self {
            tasks,
            agents,
            customers: Arc::new(Collection::new()),
            activity,
            scheduler,
            gateway,
            log_tx,
            cors_origins: config.server.cors_origins.clone(),
        }
    }
}

/// Errors surfaced to HTTP clients as `{ "success": false, "error": ... }`.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("Task not found")]
    TaskNotFound,
    #[error("Agent not found")]
    AgentNotFound,
    #[error("Customer not found")]
    CustomerNotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::TaskNotFound | ApiError::AgentNotFound | ApiError::CustomerNotFound => {
                StatusCode::NOT_FOUND
            }
        };
        (
            status,
            Json(serde_json::json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

/// HTTP API as a lifecycle component. Binds on start, drains on shutdown.
pub struct ApiServer {
    state: AppState,
    addr: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub(crate) fn new(state: AppState, addr: String) -> Self {
        Self {
            state,
            addr,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    fn name(&self) -> &str {
        "api server"
    }

    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        // A taken port fails startup.
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("binding API server to {}", self.addr))?;
        let app = router::build_api_router(self.state.clone());
        let cancel = self.cancel.clone();
        info!("API Server running at http://{}", self.addr);

        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
            {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        self.cancel.cancel();
        if let Some(mut handle) = self.handle.take() {
            // Open log streams never finish on their own.
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(joined) => joined.context("API server task")?,
                Err(_) => {
                    warn!("API server still draining after {:?}, aborting", SHUTDOWN_GRACE);
                    handle.abort();
                }
            }
        }
        Ok(())
    }
}
