//! Domain types shared by detectors and the controller pipeline.
//!
//! These types travel by value between pipeline stages and over the
//! wire. All of them serialize to JSON, both for the report body on the
//! detector protocol and for the status/inventory services.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ── Identity ──────────────────────────────────────────────────────

/// Network identity of a database endpoint.
///
/// Stable across the instance's lifecycle and used as the key for
/// deduplication and per-instance rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    pub ip: String,
    pub port: u16,
}

impl InstanceId {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Socket address form (`ip:port`) for dialing.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.ip, self.port)
    }
}

// ── Status ────────────────────────────────────────────────────────

/// Outcome of one liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// The engine answered its protocol-level check.
    DbCheckOk,
    /// The engine did not answer and no SSH corroboration was attempted.
    DbCheckFailed,
    /// The engine did not answer but the host is reachable over SSH.
    SshCheckOk,
    /// Neither the engine nor the host answered.
    SshCheckFailed,
    /// Credentials were rejected.
    AuthCheckFailed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::DbCheckOk => "db-check-ok",
            Status::DbCheckFailed => "db-check-failed",
            Status::SshCheckOk => "ssh-check-ok",
            Status::SshCheckFailed => "ssh-check-failed",
            Status::AuthCheckFailed => "auth-check-failed",
        }
    }

    /// Whether a report carrying this status may start a failover.
    ///
    /// A bare `db-check-failed` is never eligible: only the engine process
    /// is down and a machine-level failover cannot fix that.
    pub fn is_failover_candidate(&self) -> bool {
        matches!(self, Status::SshCheckFailed | Status::AuthCheckFailed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inventory ─────────────────────────────────────────────────────

/// Role of an instance inside its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    Master,
    Slave,
    Proxy,
    Standalone,
    #[serde(other)]
    Unknown,
}

/// Lifecycle status of an instance as recorded in inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    Running,
    Available,
    Unavailable,
    #[serde(other)]
    Unknown,
}

impl InventoryStatus {
    /// Only running/available instances may be switched. Anything else is
    /// already being handled or was decommissioned on purpose.
    pub fn is_switchable(&self) -> bool {
        matches!(self, InventoryStatus::Running | InventoryStatus::Available)
    }
}

/// Inventory record of one database instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMeta {
    pub ip: String,
    pub port: u16,
    pub engine_type: String,
    pub app: String,
    pub cluster: String,
    pub cluster_type: String,
    /// Failure domain.
    pub idc: String,
    pub role: InstanceRole,
    pub status: InventoryStatus,
    /// Access domain registered with the name-resolution service.
    #[serde(default)]
    pub domain: Option<String>,
}

impl InstanceMeta {
    pub fn id(&self) -> InstanceId {
        InstanceId::new(self.ip.clone(), self.port)
    }
}

// ── Detection report ──────────────────────────────────────────────

/// One probe result, as shipped from a detector to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub ip: String,
    pub port: u16,
    pub engine_type: String,
    pub app: String,
    pub cluster: String,
    pub cluster_type: String,
    pub idc: String,
    pub status: Status,
    /// Unix timestamp (seconds) of the probe.
    pub timestamp: u64,
}

impl DetectionReport {
    pub fn new(meta: &InstanceMeta, status: Status, timestamp: u64) -> Self {
        Self {
            ip: meta.ip.clone(),
            port: meta.port,
            engine_type: meta.engine_type.clone(),
            app: meta.app.clone(),
            cluster: meta.cluster.clone(),
            cluster_type: meta.cluster_type.clone(),
            idc: meta.idc.clone(),
            status,
            timestamp,
        }
    }

    pub fn id(&self) -> InstanceId {
        InstanceId::new(self.ip.clone(), self.port)
    }

    /// Rebuild an inventory-shaped record for a re-probe.
    ///
    /// Role and status are not carried by reports and come back unknown.
    pub fn to_meta(&self) -> InstanceMeta {
        InstanceMeta {
            ip: self.ip.clone(),
            port: self.port,
            engine_type: self.engine_type.clone(),
            app: self.app.clone(),
            cluster: self.cluster.clone(),
            cluster_type: self.cluster_type.clone(),
            idc: self.idc.clone(),
            role: InstanceRole::Unknown,
            status: InventoryStatus::Unknown,
            domain: None,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

// ── Switch tickets ────────────────────────────────────────────────

/// Progress of one failover attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Doing,
    Success,
    Failed,
}

/// Record of one failover attempt, from admission to terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchTicket {
    /// Assigned by the status store on creation; 0 until then.
    pub id: u64,
    pub ip: String,
    pub port: u16,
    pub engine_type: String,
    pub app: String,
    pub cluster: String,
    pub cluster_type: String,
    pub idc: String,
    pub role: InstanceRole,
    pub status: TicketStatus,
    /// Note attached by the re-verification stage.
    pub confirm_result: String,
    pub switch_result: String,
    /// Replica that took over, if any.
    pub replica: Option<InstanceId>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
}

impl SwitchTicket {
    /// Open a new ticket in the `doing` state.
    pub fn open(meta: &InstanceMeta, confirm_result: &str, now: u64) -> Self {
        Self {
            id: 0,
            ip: meta.ip.clone(),
            port: meta.port,
            engine_type: meta.engine_type.clone(),
            app: meta.app.clone(),
            cluster: meta.cluster.clone(),
            cluster_type: meta.cluster_type.clone(),
            idc: meta.idc.clone(),
            role: meta.role,
            status: TicketStatus::Doing,
            confirm_result: confirm_result.to_string(),
            switch_result: String::new(),
            replica: None,
            started_at: now,
            finished_at: None,
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        InstanceId::new(self.ip.clone(), self.port)
    }

    /// Move the ticket to a terminal state.
    pub fn finish(&mut self, status: TicketStatus, result: impl Into<String>, now: u64) {
        self.status = status;
        self.switch_result = result.into();
        self.finished_at = Some(now);
    }

    pub fn is_terminal(&self) -> bool {
        self.status != TicketStatus::Doing
    }
}

/// Severity of a switch-log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Fail,
    Success,
}

/// Append-only audit line for a switch ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchLog {
    pub ticket_id: u64,
    pub ip: String,
    pub port: u16,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: u64,
}

impl SwitchLog {
    pub fn new(ticket: &SwitchTicket, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket.id,
            ip: ticket.ip.clone(),
            port: ticket.port,
            level,
            message: message.into(),
            timestamp: epoch_secs(),
        }
    }
}

// ── Registration ──────────────────────────────────────────────────

/// Which kind of process a heartbeat belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Agent,
    Gm,
}

impl Module {
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Agent => "agent",
            Module::Gm => "gm",
        }
    }
}

/// Liveness registration of one detector or controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub ip: String,
    /// Listen port for controllers; 0 for detectors.
    pub port: u16,
    pub module: Module,
    pub idc: String,
    /// Engine type a detector covers; empty for controllers.
    pub engine_type: String,
    pub last_seen: u64,
}

impl Heartbeat {
    /// Composite key: one row per (module, ip, port, engine type).
    pub fn table_key(&self) -> String {
        format!(
            "{}/{}:{}/{}",
            self.module.as_str(),
            self.ip,
            self.port,
            self.engine_type
        )
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
