//! Detector mode — runs next to the databases of one IDC.
//!
//! In this mode, the daemon:
//! 1. Registers itself once per engine type and keeps the rows alive
//! 2. Starts one worker per engine type that shards, probes and reports
//! 3. Stops on Ctrl-C, or when a worker hits a fatal sharding error

use std::sync::Arc;

use anyhow::Context;
use dbha_core::Config;
use dbha_detect::{EngineWorker, GmRouter, registrations, run_heartbeat, send_heartbeats};
use dbha_engine::builtin_registry;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::services::Services;

pub async fn run_detector(config: Config) -> anyhow::Result<()> {
    let detector = config
        .detector
        .clone()
        .context("detector mode needs a `detector` section")?;
    info!(ip = %detector.ip, idc = %detector.idc, engines = ?detector.engine_types, "dbhad starting in detector mode");

    // ── Services and engines ─────────────────────────────────────
    let services = Services::build(&config.services)?;
    let registry = builtin_registry(&config, services.switch_services())?;

    // ── Registration ─────────────────────────────────────────────
    let beats = registrations(&detector);
    send_heartbeats(services.status.as_ref(), &beats).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat_handle = tokio::spawn(run_heartbeat(
        Arc::clone(&services.status),
        beats,
        detector.heartbeat_interval,
        shutdown_rx.clone(),
    ));

    // ── Engine workers ───────────────────────────────────────────
    let router = Arc::new(GmRouter::new(detector.send_timeout));
    let mut workers = JoinSet::new();
    for engine_type in &detector.engine_types {
        let engine = Arc::clone(registry.get(engine_type)?);
        let worker = EngineWorker::new(
            detector.clone(),
            engine,
            Arc::clone(&services.inventory),
            Arc::clone(&services.status),
            Arc::clone(&router),
        );
        workers.spawn(worker.run(shutdown_rx.clone()));
    }

    // ── Wait for shutdown or a fatal worker ──────────────────────
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("installing Ctrl-C handler")?;
            info!("shutdown signal received");
            Ok(())
        }
        Some(joined) = workers.join_next() => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "detector worker failed");
                Err(anyhow::Error::new(e).context("detector worker failed"))
            }
            Err(e) => Err(anyhow::Error::new(e).context("detector worker panicked")),
        },
    };
    let _ = shutdown_tx.send(true);

    while let Some(joined) = workers.join_next().await {
        if let Ok(Err(e)) = joined {
            error!(error = %e, "detector worker failed during shutdown");
        }
    }
    let _ = heartbeat_handle.await;

    info!("detector stopped");
    outcome
}
