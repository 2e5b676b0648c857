//! Error types for the detector agent.

use dbha_core::{CoreError, ServiceError};
use dbha_protocol::FrameError;
use thiserror::Error;

/// Roster inconsistencies. These are fatal: they mean two detectors
/// registered under one address, or registration silently failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("detector {ip} is not in the {engine_type} roster")]
    NotInRoster { ip: String, engine_type: String },

    #[error("detector {ip} appears {count} times in the {engine_type} roster")]
    Duplicate {
        ip: String,
        engine_type: String,
        count: usize,
    },
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Shard(#[from] ShardError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("report not delivered: {0}")]
    Delivery(#[from] FrameError),

    #[error("no live controller")]
    NoController,
}

impl DetectError {
    /// Whether the detector must stop rather than skip a cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DetectError::Shard(_))
    }
}
