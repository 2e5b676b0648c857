//! Controller mode — hosts the governance pipeline for one domain.
//!
//! In this mode, the daemon:
//! 1. Binds the report listener and registers as a GM
//! 2. Spawns the dedup, re-verification, admission and execution stages
//! 3. On Ctrl-C, stops accepting reports and lets running failovers finish
//! 4. If any stage stops on its own, shuts the rest down and exits with an error

use std::sync::Arc;

use anyhow::{Context, anyhow};
use dbha_core::Config;
use dbha_detect::{run_heartbeat, send_heartbeats};
use dbha_engine::builtin_registry;
use dbha_pipeline::{Pipeline, gm_registration, known_engines};
use dbha_protocol::serve;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::services::Services;

pub async fn run_controller(config: Config) -> anyhow::Result<()> {
    let controller = config
        .controller
        .clone()
        .context("controller mode needs a `controller` section")?;
    info!(ip = %controller.ip, port = controller.port, idc = %controller.idc, "dbhad starting in controller mode");

    // ── Services and engines ─────────────────────────────────────
    let services = Services::build(&config.services)?;
    let registry = builtin_registry(&config, services.switch_services())?;
    let known = known_engines(&registry);

    // ── Listener ─────────────────────────────────────────────────
    let addr = format!("{}:{}", controller.listen_addr, controller.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding report listener on {addr}"))?;

    // ── Pipeline ─────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut pipeline = Pipeline::spawn(
        &controller,
        registry,
        services.pipeline_services(),
        shutdown_rx.clone(),
    );
    let listener_handle = tokio::spawn(serve(
        listener,
        known,
        pipeline.inbound(),
        shutdown_rx.clone(),
    ));

    // ── Registration ─────────────────────────────────────────────
    let beats = vec![gm_registration(&controller)];
    send_heartbeats(services.status.as_ref(), &beats).await;
    let heartbeat_handle = tokio::spawn(run_heartbeat(
        Arc::clone(&services.status),
        beats,
        controller.heartbeat_interval,
        shutdown_rx,
    ));

    // ── Wait for shutdown or a dead stage ────────────────────────
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("installing Ctrl-C handler")?;
            info!("shutdown signal received");
            Ok(())
        }
        Some((stage, result)) = pipeline.stopped() => {
            let err = match result {
                Ok(()) => anyhow!("{stage} stage stopped unexpectedly"),
                Err(e) => anyhow::Error::new(e).context(format!("{stage} stage failed")),
            };
            error!(stage, error = %format_args!("{err:#}"), "pipeline broken, shutting down");
            Err(err)
        }
    };
    let _ = shutdown_tx.send(true);

    let _ = listener_handle.await;
    let _ = heartbeat_handle.await;
    let joined = pipeline.join().await;
    outcome?;
    joined.context("pipeline stopped with error")?;

    info!("controller stopped");
    Ok(())
}
