//! API host
//!
//! Resolves the configured providers (retrying while they are unreachable),
//! runs the startup sequence in the background and serves health endpoints. `/ready` answers 503 until the
//! startup sequence has completed.
//!
//! This process is the self-apply role when `startup.automatic_migrations`
//! is set: it applies pending migrations and seeds baseline data.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PT_CONFIG` | `config.toml` | Configuration file path |
//! | `PT_ENVIRONMENT` | `Production` | `Development` enables the development accounts |
//! | `PT_AUTOMATIC_MIGRATIONS` | `false` | Apply migrations from this process |
//! | `PT_MIGRATION_LOCK_ENABLED` | `false` | Serialize migrations through Redis |
//! | `PT_HTTP_PORT` | `8080` | Health and metrics port |
//! | `RUST_LOG` | `info` | Log level |

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use pt_config::ConfigLoader;
use pt_platform::startup::{resolve_providers, RedisLock};
use pt_platform::{
    DataStore, ReadinessSignal, StartupError, StartupOptions, StartupOrchestrator, StaticPermissionRegistry,
};
use pt_providers::ProviderRegistry;

#[derive(Clone)]
struct AppState {
    readiness: ReadinessSignal,
    prometheus: PrometheusHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    pt_common::logging::init_logging("pt-api");

    info!("Starting API host");

    let config = ConfigLoader::new().load()?;
    let prometheus = PrometheusBuilder::new().install_recorder()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let options = StartupOptions::from_config(&config, config.startup.automatic_migrations);

    // The database may still be starting, so unavailability is retried
    let registry = ProviderRegistry::from_config(&config);
    let mut resolve_rx = shutdown_tx.subscribe();
    let resources = tokio::select! {
        resolved = resolve_providers(&registry, &config, &options.readiness, &mut resolve_rx) => resolved?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received before providers resolved");
            return Ok(());
        }
    };

    let store = DataStore::from_handles(&resources.database, &resources.transport);
    let mut orchestrator = StartupOrchestrator::new(store, Arc::new(StaticPermissionRegistry), options);

    if config.redis.migration_lock_enabled {
        let lock = RedisLock::from_config(&config.redis).await?;
        info!(key = %config.redis.lock_key, "Migration lock enabled");
        orchestrator = orchestrator.with_lock(Arc::new(lock));
    }

    let readiness = orchestrator.signal();

    // Startup runs in the background so health checks answer meanwhile.
    // A failed startup shuts the process down.
    let startup_handle = {
        let shutdown_tx = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let result = orchestrator.run(shutdown_rx).await;
            if result.is_err() {
                let _ = shutdown_tx.send(());
            }
            result
        })
    };

    let state = AppState {
        readiness,
        prometheus,
    };
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", addr);

    let server_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        })
    };

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received..."),
        _ = shutdown_rx.recv() => info!("Shutting down after startup failure"),
    }
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(30), server_handle).await;

    match startup_handle.await {
        Ok(Ok(_)) | Ok(Err(StartupError::Cancelled)) => {
            info!("API host shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "API host stopped after fatal startup error");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    if state.readiness.is_ready() {
        return (StatusCode::OK, Json(serde_json::json!({ "status": "READY" })));
    }
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "status": "NOT_READY",
            "state": format!("{:?}", state.readiness.current())
        })),
    )
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
