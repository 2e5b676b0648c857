//! Detector agent loops.
//!
//! A detector runs one heartbeat loop registering it for every configured
//! engine type, and one [`EngineWorker`] per engine type. A worker
//! periodically re-fetches the agent and controller rosters and its share
//! of the inventory, and on every detection tick probes its instances
//! concurrently and ships the results.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbha_core::config::DetectorConfig;
use dbha_core::probe::{classify, probe_with_deadline};
use dbha_core::{
    Detectable, Engine, Heartbeat, InstanceId, Inventory, Module, Status, StatusStore, epoch_secs,
};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::DetectError;
use crate::router::GmRouter;
use crate::shard::ShardAssignment;
use crate::tracker::ReportTracker;

/// Registrations older than this many heartbeat intervals are dead.
const LIVENESS_FACTOR: u32 = 3;

/// Oldest `last_seen` still counted as alive.
pub fn alive_since(heartbeat_interval: Duration) -> u64 {
    epoch_secs().saturating_sub((heartbeat_interval * LIVENESS_FACTOR).as_secs())
}

/// Registration rows this detector maintains, one per engine type.
pub fn registrations(config: &DetectorConfig) -> Vec<Heartbeat> {
    config
        .engine_types
        .iter()
        .map(|engine_type| Heartbeat {
            ip: config.ip.clone(),
            port: 0,
            module: Module::Agent,
            idc: config.idc.clone(),
            engine_type: engine_type.clone(),
            last_seen: 0,
        })
        .collect()
}

/// Refresh `beats` once.
pub async fn send_heartbeats(status: &dyn StatusStore, beats: &[Heartbeat]) {
    let now = epoch_secs();
    for beat in beats {
        let mut beat = beat.clone();
        beat.last_seen = now;
        if let Err(e) = status.heartbeat(&beat).await {
            warn!(
                module = beat.module.as_str(),
                engine = %beat.engine_type,
                error = %e,
                "heartbeat failed"
            );
        }
    }
}

/// Refresh `beats` every `interval` until shutdown.
pub async fn run_heartbeat(
    status: Arc<dyn StatusStore>,
    beats: Vec<Heartbeat>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(rows = beats.len(), ?interval, "heartbeat loop started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                send_heartbeats(status.as_ref(), &beats).await;
                debug!("heartbeat sent");
            }
            _ = shutdown.changed() => {
                info!("heartbeat loop shutting down");
                break;
            }
        }
    }
}

/// Per-cycle counters, returned for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub probed: usize,
    pub shipped: usize,
    pub failed_sends: usize,
}

/// Probes and reports the instances of one engine type.
pub struct EngineWorker {
    config: DetectorConfig,
    engine: Arc<dyn Engine>,
    inventory: Arc<dyn Inventory>,
    status: Arc<dyn StatusStore>,
    router: Arc<GmRouter>,
    tracker: ReportTracker,
    shard: Option<ShardAssignment>,
    targets: Vec<Arc<dyn Detectable>>,
}

impl EngineWorker {
    pub fn new(
        config: DetectorConfig,
        engine: Arc<dyn Engine>,
        inventory: Arc<dyn Inventory>,
        status: Arc<dyn StatusStore>,
        router: Arc<GmRouter>,
    ) -> Self {
        let tracker = ReportTracker::new(config.report_interval);
        Self {
            config,
            engine,
            inventory,
            status,
            router,
            tracker,
            shard: None,
            targets: Vec::new(),
        }
    }

    pub fn engine_type(&self) -> &str {
        self.engine.engine_type()
    }

    pub fn shard(&self) -> Option<ShardAssignment> {
        self.shard
    }

    pub fn targets(&self) -> Vec<InstanceId> {
        self.targets.iter().map(|t| t.id()).collect()
    }

    /// Re-fetch rosters and inventory and recompute this worker's shard.
    pub async fn refresh(&mut self) -> Result<(), DetectError> {
        let engine_type = self.engine.engine_type().to_string();
        let since = alive_since(self.config.heartbeat_interval);

        let agents = self
            .status
            .alive(
                Module::Agent,
                Some(self.config.idc.as_str()),
                Some(engine_type.as_str()),
                since,
            )
            .await?;
        let shard = ShardAssignment::from_roster(&agents, &self.config.ip, &engine_type)?;

        let gms = self.status.alive(Module::Gm, None, None, since).await?;
        self.router.update(&gms);

        let rows = self
            .inventory
            .instances_in_domain(&self.config.idc, &engine_type)
            .await?;
        let owned = shard.select(rows);
        self.targets = self.engine.from_inventory(owned);

        let ids: HashSet<InstanceId> = self.targets.iter().map(|t| t.id()).collect();
        self.tracker.retain(&ids);

        if self.shard != Some(shard) {
            info!(
                engine = %engine_type,
                modulus = shard.modulus,
                index = shard.index,
                instances = self.targets.len(),
                "shard assignment changed"
            );
        }
        self.shard = Some(shard);
        Ok(())
    }

    /// Probe every target concurrently and ship what the tracker lets through.
    pub async fn detect_once(&mut self) -> CycleStats {
        let mut stats = CycleStats::default();
        let deadline = self.config.probe_timeout;

        let mut probes = JoinSet::new();
        for target in &self.targets {
            let target = Arc::clone(target);
            probes.spawn(async move {
                let status = classify(probe_with_deadline(Arc::clone(&target), deadline).await);
                (target, status)
            });
        }

        let mut results: Vec<(Arc<dyn Detectable>, Status)> =
            Vec::with_capacity(self.targets.len());
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }
        stats.probed = results.len();

        let now = Instant::now();
        let timestamp = epoch_secs();
        for (target, status) in results {
            let id = target.id();
            if !target.report_eligible(status) || !self.tracker.should_report(&id, status, now) {
                continue;
            }
            match self.ship(target.as_ref(), status, timestamp).await {
                Ok(()) => {
                    self.tracker.record(id, status, now);
                    stats.shipped += 1;
                }
                Err(e) => {
                    stats.failed_sends += 1;
                    warn!(instance = %id, %status, error = %e, "report not shipped");
                }
            }
        }
        stats
    }

    async fn ship(
        &self,
        target: &dyn Detectable,
        status: Status,
        timestamp: u64,
    ) -> Result<(), DetectError> {
        let body = target.serialize(status, timestamp)?;
        let client = self
            .router
            .client_for(&target.meta().ip)
            .ok_or(DetectError::NoController)?;
        let mut client = client.lock().await;
        client.send(target.engine_type(), &body).await?;
        debug!(instance = %target.id(), %status, controller = %client.addr(), "report shipped");
        Ok(())
    }

    /// Run until shutdown. Returns an error only for fatal conditions.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), DetectError> {
        let engine_type = self.engine_type().to_string();
        self.refresh_or_skip().await?;

        let mut detect = tokio::time::interval(self.config.detect_interval);
        let mut fetch = tokio::time::interval(self.config.fetch_interval);
        detect.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        fetch.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        fetch.tick().await;

        info!(engine = %engine_type, "detector worker started");
        loop {
            tokio::select! {
                _ = detect.tick() => {
                    let stats = self.detect_once().await;
                    debug!(
                        engine = %engine_type,
                        probed = stats.probed,
                        shipped = stats.shipped,
                        failed = stats.failed_sends,
                        "detection cycle done"
                    );
                }
                _ = fetch.tick() => {
                    self.refresh_or_skip().await?;
                }
                _ = shutdown.changed() => {
                    info!(engine = %engine_type, "detector worker shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Refresh; service errors skip the cycle and keep the previous shard.
    async fn refresh_or_skip(&mut self) -> Result<(), DetectError> {
        match self.refresh().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    engine = %self.engine_type(),
                    error = %e,
                    "refresh failed, keeping previous shard"
                );
                Ok(())
            }
        }
    }
}
