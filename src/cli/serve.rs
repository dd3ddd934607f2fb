use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use super::ServeArgs;
use crate::core::config::AppConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::llm::LlmGateway;
use crate::core::llm::registry::ProviderRegistry;
use crate::core::scheduler::SchedulerService;
use crate::core::terminal;
use crate::interfaces::web::{ApiServer, AppState};
use crate::logging;

pub async fn run_server(args: ServeArgs) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref()).await?;
    if let Some(host) = args.api_host {
        config.server.host = host;
    }
    if let Some(port) = args.api_port {
        config.server.port = port;
    }

    let log_tx = logging::init(&config.log_level, false);
    info!("Starting agentdesk...");

    let registry = ProviderRegistry::builtin()?;
    let gateway = LlmGateway::from_config(&config.gateway, &registry);
    let gateway_desc = match gateway.describe() {
        Some((provider, model)) => format!("{} ({})", provider, model),
        None => "not configured, placeholder replies".to_string(),
    };

    let gateway_configured = gateway.is_configured();
    let addr = config.bind_addr();
    let state = AppState::assemble(&config, gateway, log_tx);

    let mut manager = LifecycleManager::new();
    // Scheduler first so reconciled tasks are armed before requests arrive.
    manager.attach(Arc::new(Mutex::new(SchedulerService::new(
        state.scheduler.clone(),
    ))));
    manager.attach(Arc::new(Mutex::new(ApiServer::new(state, addr.clone()))));
    manager.start().await?;

    terminal::print_success("agentdesk is running. Press Ctrl+C to stop.");
    terminal::print_status("LLM gateway", &gateway_desc);
    if !gateway_configured {
        terminal::print_warn("Task runs will complete with placeholder replies until a provider key is set.");
    }
    terminal::print_status(
        "Scheduler",
        &format!(
            "{:?} time, wakes at least every {:?}",
            config.scheduler.timezone,
            Duration::from_secs(config.scheduler.max_sleep_secs)
        ),
    );
    terminal::print_link("API", &format!("http://{}", addr));

    wait_for_shutdown_signal().await?;
    info!("Shutting down agentdesk...");
    manager.shutdown().await?;
    Ok(())
}

/// Resolve on Ctrl-C, or on SIGTERM where the platform has it.
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = sigterm.recv() => Ok(()),
            res = tokio::signal::ctrl_c() => Ok(res?),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
