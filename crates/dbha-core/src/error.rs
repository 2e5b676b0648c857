//! Error types shared across DBHA crates.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for external-service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors raised by the engine registry and report codecs.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no engine registered for type {0:?}")]
    UnknownEngine(String),

    #[error("engine {0:?} registered twice")]
    DuplicateEngine(String),

    #[error("malformed report body: {0}")]
    MalformedReport(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Errors from a single liveness probe.
///
/// These never travel past the detector: they are classified into a
/// [`Status`](crate::Status) before reporting.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("probe exceeded deadline of {0:?}")]
    Deadline(Duration),

    #[error("probe task aborted: {0}")]
    Aborted(String),
}

/// Errors from a failover step.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("check failed: {0}")]
    Check(String),

    #[error("switch failed: {0}")]
    Switch(String),

    #[error("meta update failed: {0}")]
    UpdateMeta(String),

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Errors from the inventory, status and name-resolution services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned code {code}: {msg}")]
    Application { code: i64, msg: String },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    Missing(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
