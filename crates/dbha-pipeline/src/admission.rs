//! Admission-control stage (GQA).
//!
//! Rate-limits failovers per instance, per IDC and globally. A confirmed
//! host failure expands to every instance on that host; each candidate is
//! judged in turn and admitted ones are handed to execution one at a
//! time, so the counters read for the next candidate include the ticket
//! of the previous one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbha_core::config::AdmissionConfig;
use dbha_core::{
    EngineRegistry, InstanceMeta, Inventory, ServiceResult, StatusStore, SwitchScope, Switchable,
    epoch_secs,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::messages::{Admitted, Confirmed, SettleSender, settle};

/// IDCs whose failovers are on hold after a storm guard tripped.
#[derive(Debug)]
pub struct IdcCooldown {
    expire: Duration,
    until: Mutex<HashMap<String, Instant>>,
}

impl IdcCooldown {
    pub fn new(expire: Duration) -> Self {
        Self {
            expire,
            until: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_cooling_at(&self, idc: &str, now: Instant) -> bool {
        let mut until = self.until.lock();
        match until.get(idc) {
            Some(end) if now < *end => true,
            Some(_) => {
                until.remove(idc);
                false
            }
            None => false,
        }
    }

    pub fn trip_at(&self, idc: &str, now: Instant) {
        self.until.lock().insert(idc.to_string(), now + self.expire);
    }
}

/// Why a candidate was held back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hold {
    IdcCoolingDown,
    GlobalLimit { count: u64 },
    IdcLimit { count: u64 },
}

/// Outcome of the admission rules for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admit,
    /// Inventory says the instance is not switchable.
    Skip,
    /// Flapping guard: too many recent switches of this instance.
    Deny { count: u64 },
    /// Retry later; the dedup entry is settled.
    Defer(Hold),
}

/// What became of one candidate after admission.
enum Outcome {
    Ticket(u64),
    Deferred,
    Dropped,
}

pub struct AdmissionStage {
    config: AdmissionConfig,
    registry: EngineRegistry,
    inventory: Arc<dyn Inventory>,
    status: Arc<dyn StatusStore>,
    cooldown: IdcCooldown,
    settle_tx: SettleSender,
}

impl AdmissionStage {
    pub fn new(
        config: AdmissionConfig,
        registry: EngineRegistry,
        inventory: Arc<dyn Inventory>,
        status: Arc<dyn StatusStore>,
        settle_tx: SettleSender,
    ) -> Self {
        let cooldown = IdcCooldown::new(config.idc_cooldown_expire);
        Self {
            config,
            registry,
            inventory,
            status,
            cooldown,
            settle_tx,
        }
    }

    /// Apply the rules in order, stopping at the first that holds the
    /// candidate back.
    pub async fn decide(&self, meta: &InstanceMeta) -> ServiceResult<Decision> {
        let now = Instant::now();
        if self.cooldown.is_cooling_at(&meta.idc, now) {
            return Ok(Decision::Defer(Hold::IdcCoolingDown));
        }
        if !meta.status.is_switchable() {
            return Ok(Decision::Skip);
        }

        let count = self
            .count(SwitchScope::Instance(meta.id()), self.config.single_switch_interval)
            .await?;
        if count >= self.config.single_switch_limit {
            return Ok(Decision::Deny { count });
        }

        let count = self
            .count(SwitchScope::All, self.config.all_switch_interval)
            .await?;
        if count >= self.config.all_host_switch_limit {
            self.cooldown.trip_at(&meta.idc, now);
            return Ok(Decision::Defer(Hold::GlobalLimit { count }));
        }

        let count = self
            .count(
                SwitchScope::Idc(meta.idc.clone()),
                self.config.single_switch_idc_interval,
            )
            .await?;
        if count >= self.config.single_switch_idc {
            self.cooldown.trip_at(&meta.idc, now);
            return Ok(Decision::Defer(Hold::IdcLimit { count }));
        }

        Ok(Decision::Admit)
    }

    async fn count(&self, scope: SwitchScope, window: Duration) -> ServiceResult<u64> {
        let since = epoch_secs().saturating_sub(window.as_secs());
        self.status.count_switches(&scope, since).await
    }

    /// Expand one confirmed failure to its host and admit what passes.
    /// Returns the ids of tickets created.
    pub async fn admit(
        &self,
        confirmed: Confirmed,
        out: &mpsc::Sender<Admitted>,
    ) -> Result<Vec<u64>, PipelineError> {
        let reported = confirmed.report.id();
        let rows = match self.inventory.instances_on_host(&confirmed.report.ip).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(instance = %reported, error = %e, "host lookup failed, deferring");
                settle(&self.settle_tx, reported).await;
                return Ok(Vec::new());
            }
        };
        let (candidates, unknown) = self.registry.switch_candidates(rows);
        for row in &unknown {
            warn!(instance = %row.id(), engine = %row.engine_type, "no engine registered, not switchable");
        }
        if candidates.is_empty() {
            info!(instance = %reported, "no switch candidates on host");
            settle(&self.settle_tx, reported).await;
            return Ok(Vec::new());
        }

        let mut tickets = Vec::new();
        let mut deferred = Vec::new();
        for switch in candidates {
            let id = switch.id();
            match self.admit_one(switch, &confirmed.note, out).await? {
                Outcome::Ticket(ticket) => tickets.push(ticket),
                Outcome::Deferred => deferred.push(id),
                Outcome::Dropped => {}
            }
        }
        // Dedup is keyed by the reported identity, which may itself have
        // been skipped while a sibling waits for a retry.
        if !deferred.is_empty() && !deferred.contains(&reported) {
            settle(&self.settle_tx, reported).await;
        }
        Ok(tickets)
    }

    async fn admit_one(
        &self,
        switch: Box<dyn Switchable>,
        note: &str,
        out: &mpsc::Sender<Admitted>,
    ) -> Result<Outcome, PipelineError> {
        let id = switch.id();
        let decision = match self.decide(switch.meta()).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(instance = %id, error = %e, "switch counters unavailable, deferring");
                settle(&self.settle_tx, id).await;
                return Ok(Outcome::Deferred);
            }
        };

        match decision {
            Decision::Admit => {}
            Decision::Skip => {
                info!(instance = %id, status = ?switch.meta().status, "not switchable in inventory, skipped");
                return Ok(Outcome::Dropped);
            }
            Decision::Deny { count } => {
                warn!(instance = %id, count, limit = self.config.single_switch_limit, "instance switched too often, denied");
                return Ok(Outcome::Dropped);
            }
            Decision::Defer(hold) => {
                warn!(instance = %id, idc = %switch.meta().idc, ?hold, "failover deferred");
                settle(&self.settle_tx, id).await;
                return Ok(Outcome::Deferred);
            }
        }

        let (ack, acked) = oneshot::channel();
        out.send(Admitted {
            switch,
            note: note.to_string(),
            ack,
        })
        .await
        .map_err(|_| PipelineError::QueueClosed("execution"))?;

        match acked.await {
            Ok(Ok(ticket)) => {
                info!(instance = %id, ticket, "failover admitted");
                Ok(Outcome::Ticket(ticket))
            }
            Ok(Err(reason)) => {
                warn!(instance = %id, %reason, "execution declined admitted candidate");
                Ok(Outcome::Dropped)
            }
            Err(_) => {
                warn!(instance = %id, "execution dropped admitted candidate");
                Ok(Outcome::Dropped)
            }
        }
    }

    /// Run GQA until shutdown or until GMM goes away. Confirmations are
    /// handled strictly one after another.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<Confirmed>,
        out: mpsc::Sender<Admitted>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        info!("admission stage started");
        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    let Some(confirmed) = msg else { break };
                    match self.admit(confirmed, &out).await {
                        Ok(tickets) => debug!(admitted = tickets.len(), "confirmation handled"),
                        Err(_) if *shutdown.borrow() => break,
                        Err(e) => return Err(e),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("admission stage shutting down");
        Ok(())
    }
}
