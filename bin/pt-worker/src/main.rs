//! Background worker
//!
//! Never applies migrations or seeds: it waits until the schema is current,
//! then runs the deleted user purge on a fixed interval.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PT_CONFIG` | `config.toml` | Configuration file path |
//! | `PT_PURGE_INTERVAL_SECONDS` | `1800` | Purge interval |
//! | `PT_PURGE_LOCK_ENABLED` | `false` | One purge pass at a time across workers, through Redis |
//! | `PT_METRICS_PORT` | `9091` | Metrics/health port |
//! | `RUST_LOG` | `info` | Log level |

use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use pt_config::ConfigLoader;
use pt_platform::startup::{resolve_providers, RedisLock};
use pt_platform::{
    DataStore, DeletedUserPurger, ReadinessSignal, StartupError, StartupOptions, StartupOrchestrator,
    StaticPermissionRegistry,
};
use pt_providers::ProviderRegistry;

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    pt_common::logging::init_logging("pt-worker");

    info!("Starting background worker");

    let config = ConfigLoader::new().load()?;
    let metrics_port: u16 = env_or_parse("PT_METRICS_PORT", 9091);
    let prometheus = PrometheusBuilder::new().install_recorder()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let options = StartupOptions::from_config(&config, false);

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

    let orchestrator = StartupOrchestrator::new(store.clone(), Arc::new(StaticPermissionRegistry), options);
    let readiness = orchestrator.signal();

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    let metrics_app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let prometheus = prometheus.clone();
                async move { prometheus.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(readiness.clone())));

    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    info!("Metrics server listening on http://{}/metrics", metrics_addr);
    let metrics_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(metrics_listener, metrics_app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        })
    };

    let mut purger = DeletedUserPurger::new(
        store,
        config.worker.purge_batch_size,
        config.worker.purge_interval(),
    );
    if config.redis.purge_lock_enabled {
        let lock = RedisLock::connect(
            &config.redis.url,
            config.redis.purge_lock_key.clone(),
            config.redis.lock_ttl_seconds,
        )
        .await?;
        info!(key = %config.redis.purge_lock_key, "Purge lock enabled");
        purger = purger.with_lock(Arc::new(lock));
    }

    let worker_handle = {
        let shutdown_tx = shutdown_tx.clone();
        let startup_rx = shutdown_tx.subscribe();
        let purge_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            match orchestrator.run(startup_rx).await {
                Ok(_) => {
                    purger.run(purge_rx).await;
                    Ok(())
                }
                Err(e) => {
                    let _ = shutdown_tx.send(());
                    Err(e)
                }
            }
        })
    };

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received..."),
        _ = shutdown_rx.recv() => info!("Shutting down after startup failure"),
    }
    let _ = shutdown_tx.send(());

    let result = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = metrics_handle.await;
        worker_handle.await
    })
    .await;

    match result {
        Ok(Ok(Ok(()))) | Ok(Ok(Err(StartupError::Cancelled))) => {
            info!("Background worker shutdown complete");
            Ok(())
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "Background worker stopped after fatal startup error");
            Err(e.into())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            error!("Background worker did not stop within 30s");
            Ok(())
        }
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler(readiness: ReadinessSignal) -> (StatusCode, Json<serde_json::Value>) {
    if readiness.is_ready() {
        (StatusCode::OK, Json(serde_json::json!({ "status": "READY" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "NOT_READY" })),
        )
    }
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
