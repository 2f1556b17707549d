//! `launchpadd serve`: the long-running daemon.
//!
//! In this mode, the daemon:
//! 1. Opens the state store under the data directory
//! 2. Builds the controller client, smoke runner and orchestrator
//! 3. Resumes executions left in flight by a previous run
//! 4. Runs the recovery sweep in the background
//! 5. Serves the REST API until Ctrl-C

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use launchpad_core::{FsArtifactRegistry, LaunchpadConfig};
use launchpad_release::{Orchestrator, OrchestratorSettings, TracingAlertSink};
use launchpad_smoke::SmokeRunner;
use launchpad_state::StateStore;
use launchpad_traffic::HttpTrafficController;

pub async fn run_serve(config: LaunchpadConfig) -> anyhow::Result<()> {
    info!("Launchpad daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.daemon.data_dir)?;
    let db_path = config.daemon.data_dir.join("launchpad.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let registry = Arc::new(FsArtifactRegistry::new(config.registry.root.clone()));
    info!(root = ?config.registry.root, "artifact registry opened");

    let controller = Arc::new(HttpTrafficController::new(config.controller.address.clone()));
    info!(address = %config.controller.address, "traffic controller client ready");

    let smoke = Arc::new(SmokeRunner::new(config.smoke.clone()));
    info!(suite = %config.smoke.version, "smoke runner initialized");

    let settings = OrchestratorSettings::from_config(&config);
    info!(holder = %settings.holder, "orchestrator initialized");
    let orchestrator = Orchestrator::new(
        store,
        registry,
        controller,
        smoke,
        Arc::new(TracingAlertSink),
        settings,
    );

    let resumed = orchestrator.recover_in_flight().await?;
    info!(count = resumed.len(), "in-flight executions resumed");

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let recovery_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let interval = Duration::from_secs(config.daemon.recovery_interval_secs);
        async move { orchestrator.run_recovery(interval, shutdown_rx).await }
    });

    // ── API server ─────────────────────────────────────────────

    let router = launchpad_api::build_router(orchestrator.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.daemon.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = recovery_handle.await;
    // Drivers stop where they are; the next start resumes them.
    orchestrator.shutdown().await;

    info!("Launchpad daemon stopped");
    Ok(())
}
