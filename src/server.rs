/// Server setup and initialization
///
/// Wires together all components: storage, registry, audit sinks, execution
/// engine, interval scheduler and HTTP routes.

use crate::{
    api::{create_history_routes, create_webhook_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{
        audit::{AuditSink, BroadcastSink, FanoutSink, HistoryWriter},
        engine::ExecutionEngine,
        executor::NodeExecutor,
        scheduler::IntervalSchedulerService,
    },
    workflow::{
        registry::{WorkflowRegistry, WorkflowSource},
        storage::WorkflowStorage,
    },
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Initialize every component and return the shared application state
pub async fn build_state(config: &Config) -> Result<AppState> {
    tracing::info!("📋 Opening workflow storage: {}", config.database.url);
    let storage = WorkflowStorage::connect(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database {}: {}", config.database.url, e))?;
    storage.init_schema().await?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(storage.clone()));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    tracing::info!("🧾 Starting history writer");
    let live = BroadcastSink::new(config.audit.live_capacity);
    let (history, _writer_task) = HistoryWriter::spawn(storage.clone());
    let sink: Arc<dyn AuditSink> = Arc::new(FanoutSink::new(vec![
        Arc::new(history) as Arc<dyn AuditSink>,
        Arc::new(live.clone()) as Arc<dyn AuditSink>,
    ]));

    tracing::info!("🚀 Initializing execution engine");
    let executor = Arc::new(
        NodeExecutor::new().map_err(|e| anyhow::anyhow!("Failed to initialize node executor: {}", e))?,
    );
    let workflows: Arc<dyn WorkflowSource> = registry.clone();
    let engine = Arc::new(ExecutionEngine::new(executor, workflows, sink));

    tracing::info!("⏰ Initializing interval scheduler service");
    let scheduler = Arc::new(
        IntervalSchedulerService::new(Arc::clone(&registry), Arc::clone(&engine), storage.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize interval scheduler: {}", e))?,
    );

    if config.scheduler.enabled {
        let scheduler_clone = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if let Err(e) = scheduler_clone.start().await {
                tracing::error!("❌ Failed to start interval scheduler: {}", e);
            }
        });
    } else {
        tracing::info!("⏸️ Interval scheduler disabled by configuration");
    }

    Ok(AppState {
        storage,
        registry,
        scheduler,
        engine,
        live,
    })
}

/// Build the HTTP router over an application state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_webhook_routes())
        .merge(create_history_routes())
        .with_state(state)
}


/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Floowsynk server...");

    let state = build_state(&config).await?;
    let scheduler = Arc::clone(&state.scheduler);
    let app = router(state);
    tracing::info!("✅ Application initialized successfully");

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if config.scheduler.enabled {
        scheduler.stop().await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown signal received");
}

async fn health_check() -> &'static str {
    "ok"
}
