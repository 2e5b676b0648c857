//! Dedup stage (GDM).
//!
//! Decodes inbound frames, drops repeats of an identity's last status and
//! forwards changes to re-verification. Entries age out after
//! `dup_expire`; a settled identity has its receive time rewound past the
//! window so its next report counts as fresh.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dbha_core::{EngineRegistry, InstanceId, Status};
use dbha_protocol::Inbound;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::messages::Suspect;

#[derive(Debug, Clone, Copy)]
struct Entry {
    status: Status,
    received_at: Instant,
}

/// Outcome of one cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Suppress,
}

#[derive(Debug)]
pub struct DedupCache {
    expire: Duration,
    entries: Mutex<HashMap<InstanceId, Entry>>,
}

impl DedupCache {
    pub fn new(expire: Duration) -> Self {
        Self {
            expire,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn observe(&self, id: &InstanceId, status: Status) -> Verdict {
        self.observe_at(id, status, Instant::now())
    }

    /// Classify one report. Forwarded reports replace the entry; an
    /// identical status inside the window leaves it untouched.
    pub fn observe_at(&self, id: &InstanceId, status: Status, now: Instant) -> Verdict {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(id)
            && entry.status == status
            && now.saturating_duration_since(entry.received_at) <= self.expire
        {
            return Verdict::Suppress;
        }
        entries.insert(
            id.clone(),
            Entry {
                status,
                received_at: now,
            },
        );
        Verdict::Forward
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Evict entries older than the expiry. Returns how many went.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.received_at) <= self.expire);
        before - entries.len()
    }

    pub fn settle(&self, id: &InstanceId) {
        self.settle_at(id, Instant::now());
    }

    /// Age the entry past the expiry so the next report is forwarded.
    pub fn settle_at(&self, id: &InstanceId, now: Instant) {
        let mut entries = self.entries.lock();
        let Some(rewound) = now.checked_sub(self.expire + Duration::from_secs(1)) else {
            entries.remove(id);
            return;
        };
        if let Some(entry) = entries.get_mut(id) {
            entry.received_at = rewound;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Run GDM until shutdown or until GMM goes away.
pub async fn run_dedup(
    registry: EngineRegistry,
    cache: DedupCache,
    scan_interval: Duration,
    mut inbound: mpsc::Receiver<Inbound>,
    mut settled: mpsc::Receiver<InstanceId>,
    out: mpsc::Sender<Suspect>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), PipelineError> {
    let mut sweep = tokio::time::interval(scan_interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    sweep.tick().await;

    info!("dedup stage started");
    loop {
        tokio::select! {
            msg = inbound.recv() => {
                let Some(Inbound { peer, frame }) = msg else {
                    info!("inbound queue closed, dedup stage stopping");
                    return Ok(());
                };
                let (report, detectable) =
                    match registry.decode_report(&frame.engine_type, &frame.body) {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            warn!(%peer, engine = %frame.engine_type, error = %e, "dropping report");
                            continue;
                        }
                    };
                let id = report.id();
                match cache.observe(&id, report.status) {
                    Verdict::Suppress => {
                        debug!(instance = %id, status = %report.status, "duplicate report suppressed");
                    }
                    Verdict::Forward => {
                        debug!(instance = %id, status = %report.status, %peer, "status change forwarded");
                        if out.send(Suspect { report, detectable }).await.is_err() {
                            if *shutdown.borrow() {
                                return Ok(());
                            }
                            return Err(PipelineError::QueueClosed("re-verification"));
                        }
                    }
                }
            }
            Some(id) = settled.recv() => {
                debug!(instance = %id, "dedup entry settled");
                cache.settle(&id);
            }
            _ = sweep.tick() => {
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!(evicted, remaining = cache.len(), "dedup sweep");
                }
            }
            _ = shutdown.changed() => {
                info!("dedup stage shutting down");
                return Ok(());
            }
        }
    }
}
