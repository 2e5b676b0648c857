//! External collaborators of the pipeline.
//!
//! The inventory, status/ticket and name-resolution services are the only
//! cross-controller shared state. They are reached through these traits
//! so the same stages run against the HTTP clients in production and the
//! embedded store in single-node deployments and tests.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::ServiceResult;
use crate::types::{
    DetectionReport, Heartbeat, InstanceId, InstanceMeta, InventoryStatus, Module, SwitchLog,
    SwitchTicket,
};

/// Instance and cluster metadata.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// All instances of one engine type in one failure domain.
    async fn instances_in_domain(
        &self,
        idc: &str,
        engine_type: &str,
    ) -> ServiceResult<Vec<InstanceMeta>>;

    /// All instances hosted on one machine, any engine.
    async fn instances_on_host(&self, ip: &str) -> ServiceResult<Vec<InstanceMeta>>;

    /// All instances of one cluster.
    async fn cluster_instances(&self, cluster: &str) -> ServiceResult<Vec<InstanceMeta>>;

    async fn set_status(&self, id: &InstanceId, status: InventoryStatus) -> ServiceResult<()>;

    /// Promote `replica` and demote `master`.
    async fn swap_role(&self, master: &InstanceId, replica: &InstanceId) -> ServiceResult<()>;
}

/// Scope of a switch-count query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchScope {
    Instance(InstanceId),
    Idc(String),
    All,
}

/// Heartbeats, switch tickets, switch logs and admission counters.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert or refresh a registration row.
    async fn heartbeat(&self, beat: &Heartbeat) -> ServiceResult<()>;

    /// Registrations of `module` seen at or after `since`, sorted by ip.
    ///
    /// `idc` and `engine_type` narrow the result when given.
    async fn alive(
        &self,
        module: Module,
        idc: Option<&str>,
        engine_type: Option<&str>,
        since: u64,
    ) -> ServiceResult<Vec<Heartbeat>>;

    /// Persist a new ticket and return its id.
    async fn create_ticket(&self, ticket: &SwitchTicket) -> ServiceResult<u64>;

    async fn update_ticket(&self, ticket: &SwitchTicket) -> ServiceResult<()>;

    /// A `doing` ticket for this instance started at or after `since`.
    async fn open_ticket(
        &self,
        id: &InstanceId,
        since: u64,
    ) -> ServiceResult<Option<SwitchTicket>>;

    async fn append_log(&self, log: &SwitchLog) -> ServiceResult<()>;

    /// Number of tickets in `scope` started at or after `since`.
    async fn count_switches(&self, scope: &SwitchScope, since: u64) -> ServiceResult<u64>;
}

/// DNS/CLB/Polaris style name-resolution service.
#[async_trait]
pub trait NameService: Send + Sync {
    /// Remove one endpoint from the entries of `domain`.
    async fn deregister(&self, domain: &str, id: &InstanceId) -> ServiceResult<()>;
}

/// Operator-facing event raised by the pipeline.
#[derive(Debug, Clone)]
pub enum Alert {
    SwitchSucceeded { ticket: SwitchTicket },
    SwitchFailed { ticket: SwitchTicket, reason: String },
    AuthFailure { report: DetectionReport },
    /// A confirmed failover that never got a ticket.
    SwitchNotStarted { instance: InstanceMeta, reason: String },
}

impl Alert {
    pub fn title(&self) -> &'static str {
        match self {
            Alert::SwitchSucceeded { .. } => "switch succeeded",
            Alert::SwitchFailed { .. } => "switch failed",
            Alert::AuthFailure { .. } => "authentication check failed",
            Alert::SwitchNotStarted { .. } => "switch not started",
        }
    }
}

/// Sink for [`Alert`]s. Delivery is best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert);
}

/// Notifier that writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) {
        match alert {
            Alert::SwitchSucceeded { ticket } => {
                info!(
                    ticket_id = ticket.id,
                    instance = %ticket.instance_id(),
                    idc = %ticket.idc,
                    "{}",
                    alert.title()
                );
            }
            Alert::SwitchFailed { ticket, reason } => {
                error!(
                    ticket_id = ticket.id,
                    instance = %ticket.instance_id(),
                    idc = %ticket.idc,
                    %reason,
                    "{}",
                    alert.title()
                );
            }
            Alert::AuthFailure { report } => {
                warn!(
                    instance = %report.id(),
                    engine = %report.engine_type,
                    "{}",
                    alert.title()
                );
            }
            Alert::SwitchNotStarted { instance, reason } => {
                error!(
                    instance = %instance.id(),
                    idc = %instance.idc,
                    %reason,
                    "{}",
                    alert.title()
                );
            }
        }
    }
}
