//! Controller assembly: four stages joined by bounded queues.
//!
//! ```text
//! listener ─Inbound─▶ GDM ─Suspect─▶ GMM ─Confirmed─▶ GQA ─Admitted─▶ GCM
//!                      ▲                               │               │
//!                      └──────────── settle ───────────┴───────────────┘
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use dbha_core::config::ControllerConfig;
use dbha_core::{EngineRegistry, Heartbeat, Inventory, Module, Notifier, StatusStore};
use dbha_protocol::Inbound;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::admission::AdmissionStage;
use crate::dedup::{DedupCache, run_dedup};
use crate::error::PipelineError;
use crate::execute::{ExecuteServices, ExecuteStage};
use crate::verify::VerifyStage;

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct PipelineServices {
    pub inventory: Arc<dyn Inventory>,
    pub status: Arc<dyn StatusStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// Registration row this controller keeps alive.
pub fn gm_registration(config: &ControllerConfig) -> Heartbeat {
    Heartbeat {
        ip: config.ip.clone(),
        port: config.port,
        module: Module::Gm,
        idc: config.idc.clone(),
        engine_type: String::new(),
        last_seen: 0,
    }
}

/// Engine types the report listener accepts.
pub fn known_engines(registry: &EngineRegistry) -> Arc<HashSet<String>> {
    Arc::new(registry.engine_types().into_iter().collect())
}

/// Name of a stage and how it stopped.
pub type StageExit = (&'static str, Result<(), PipelineError>);

/// Handle to a running pipeline.
pub struct Pipeline {
    inbound: mpsc::Sender<Inbound>,
    stages: JoinSet<StageExit>,
}

/// Run one stage on its own task so a panic comes back as its exit.
fn stage<F>(name: &'static str, run: F) -> impl Future<Output = StageExit> + Send + 'static
where
    F: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    async move {
        let result = match tokio::spawn(run).await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Join(format!("{name}: {e}"))),
        };
        (name, result)
    }
}

impl Pipeline {
    /// Spawn every stage. Stages stop when `shutdown` flips; GCM first
    /// lets in-flight failovers finish.
    pub fn spawn(
        config: &ControllerConfig,
        registry: EngineRegistry,
        services: PipelineServices,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (suspect_tx, suspect_rx) = mpsc::channel(capacity);
        let (confirmed_tx, confirmed_rx) = mpsc::channel(capacity);
        let (admitted_tx, admitted_rx) = mpsc::channel(capacity);
        let (settle_tx, settle_rx) = mpsc::channel(capacity);

        let mut stages = JoinSet::new();
        stages.spawn(stage("dedup", run_dedup(
            registry.clone(),
            DedupCache::new(config.dup_expire),
            config.dup_scan_interval,
            inbound_rx,
            settle_rx,
            suspect_tx,
            shutdown.clone(),
        )));

        let verify = VerifyStage::new(
            config.ip.clone(),
            config.reprobe_timeout,
            Arc::clone(&services.notifier),
        );
        stages.spawn(stage(
            "re-verification",
            verify.run(suspect_rx, confirmed_tx, shutdown.clone()),
        ));

        let admission = AdmissionStage::new(
            config.admission.clone(),
            registry,
            Arc::clone(&services.inventory),
            Arc::clone(&services.status),
            settle_tx.clone(),
        );
        stages.spawn(stage(
            "admission",
            admission.run(confirmed_rx, admitted_tx, shutdown.clone()),
        ));

        let execute = ExecuteStage::new(
            ExecuteServices {
                inventory: services.inventory,
                status: services.status,
                notifier: services.notifier,
            },
            config.admission.open_ticket_window,
            settle_tx,
        );
        stages.spawn(stage("execution", execute.run(admitted_rx, shutdown)));

        info!(capacity, "pipeline started");
        Self {
            inbound: inbound_tx,
            stages,
        }
    }

    /// Sender the report listener feeds.
    pub fn inbound(&self) -> mpsc::Sender<Inbound> {
        self.inbound.clone()
    }

    /// Wait for the next stage to stop. Before shutdown any exit, even
    /// `Ok`, leaves the pipeline broken. `None` once every stage is gone.
    pub async fn stopped(&mut self) -> Option<StageExit> {
        next_exit(&mut self.stages).await
    }

    /// Wait for every stage; the first failure is returned after all
    /// stages have stopped.
    pub async fn join(self) -> Result<(), PipelineError> {
        let Self {
            inbound,
            mut stages,
        } = self;
        drop(inbound);
        let mut first = None;
        while let Some((name, result)) = next_exit(&mut stages).await {
            if let Err(e) = result {
                error!(stage = name, error = %e, "stage stopped with error");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

async fn next_exit(stages: &mut JoinSet<StageExit>) -> Option<StageExit> {
    let joined = stages.join_next().await?;
    Some(joined.unwrap_or_else(|e| ("stage", Err(PipelineError::Join(e.to_string())))))
}
