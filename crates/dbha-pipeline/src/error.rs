//! Error types for the governance pipeline.

use dbha_core::{CoreError, ServiceError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("report rejected: {0}")]
    Decode(#[from] CoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("{0} queue closed")]
    QueueClosed(&'static str),

    #[error("instance {0} already has an open ticket")]
    TicketOpen(String),

    #[error("stage task failed: {0}")]
    Join(String),
}
