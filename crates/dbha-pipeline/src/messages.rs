//! Work items passed between pipeline stages.

use std::fmt;
use std::sync::Arc;

use dbha_core::{Detectable, DetectionReport, InstanceId, Switchable};
use tokio::sync::{mpsc, oneshot};

/// GDM → GMM: a report whose status changed for its identity.
#[derive(Debug)]
pub struct Suspect {
    pub report: DetectionReport,
    pub detectable: Arc<dyn Detectable>,
}

/// GMM → GQA: a failure confirmed by the controller's own re-probe.
#[derive(Debug, Clone)]
pub struct Confirmed {
    pub report: DetectionReport,
    pub note: String,
}

/// Reply from GCM once the ticket for an admitted candidate exists (or
/// could not be created).
pub type TicketAck = Result<u64, String>;

/// GQA → GCM: one candidate that passed every admission rule.
pub struct Admitted {
    pub switch: Box<dyn Switchable>,
    pub note: String,
    pub ack: oneshot::Sender<TicketAck>,
}

impl fmt::Debug for Admitted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admitted")
            .field("instance", &self.switch.id())
            .field("note", &self.note)
            .finish()
    }
}

/// Back-channel to GDM: identities whose dedup entry should be treated
/// as expired.
pub type SettleSender = mpsc::Sender<InstanceId>;

/// Best-effort settle; a closed GDM only means the pipeline is stopping.
pub(crate) async fn settle(tx: &SettleSender, id: InstanceId) {
    if tx.send(id).await.is_err() {
        tracing::debug!("settle queue closed");
    }
}
