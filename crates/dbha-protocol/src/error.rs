//! Error types for the detector wire protocol.

use std::time::Duration;

use thiserror::Error;

use crate::frame::DecodeState;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed byte 0x{byte:02x} in state {state:?}")]
    Malformed { state: DecodeState, byte: u8 },

    #[error("engine type {0:?} is not registered")]
    UnknownEngine(String),

    #[error("body length {len} exceeds limit {max}")]
    BodyTooLarge { len: usize, max: usize },

    #[error("unexpected acknowledgement {0:?}")]
    BadAck(Vec<u8>),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("report queue closed")]
    QueueClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Errors after which the connection is closed rather than re-scanned.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FrameError::BodyTooLarge { .. }
                | FrameError::Io(_)
                | FrameError::QueueClosed
                | FrameError::Timeout(_)
        )
    }
}
