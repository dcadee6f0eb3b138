//! `stencild serve`: store, gate, controller loop and OSB API in one process.

use std::net::SocketAddr;
use std::sync::Arc;

use stencil_broker::{AuthorizationGate, BrokerEngine, RuleGate, TemplateInstanceController};
use stencil_core::BrokerConfig;
use stencil_state::{ResourceStore, StateStore};
use tokio::sync::watch;
use tracing::{error, info};

/// Open the redb store under the configured data directory.
pub fn open_store(config: &BrokerConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.broker.data_dir)?;
    let db_path = config.database_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

pub async fn run_serve(config: BrokerConfig) -> anyhow::Result<()> {
    info!("Stencil broker starting");

    let min_api_version = stencil_api::parse_api_version(&config.broker.min_api_version)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "broker.min_api_version {:?} is not a version",
                config.broker.min_api_version
            )
        })?;

    // ── Initialize subsystems ──────────────────────────────────

    let store: Arc<dyn ResourceStore> = Arc::new(open_store(&config)?);

    let gate: Arc<dyn AuthorizationGate> = Arc::new(RuleGate::from_config(&config.authz));
    info!(rules = config.authz.rules.len(), default = ?config.authz.default, "authorization gate initialized");

    let engine = BrokerEngine::from_config(&config, store.clone(), gate.clone());
    let controller = TemplateInstanceController::from_config(&config, store, gate);
    info!(
        interval = config.controller.interval_secs,
        "instance controller initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let controller_handle = tokio::spawn(async move {
        controller.run(shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = stencil_api::build_router(engine, min_api_version);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.broker.port));

    info!(%addr, "OSB API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = controller_handle.await;

    info!("Stencil broker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_store_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BrokerConfig::default();
        config.broker.data_dir = dir.path().join("nested").join("data");

        open_store(&config).unwrap();
        assert!(config.database_path().exists());
    }

    #[tokio::test]
    async fn bad_min_api_version_fails_before_binding() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BrokerConfig::default();
        config.broker.data_dir = dir.path().to_path_buf();
        config.broker.min_api_version = "latest".to_string();

        let err = run_serve(config).await.unwrap_err();
        assert!(err.to_string().contains("min_api_version"));
    }
}
