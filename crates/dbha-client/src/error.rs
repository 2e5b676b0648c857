//! Error types for the HTTP service clients.

use dbha_core::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build http client: {0}")]
    Build(String),

    #[error("tls material: {0}")]
    Tls(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http status {0}")]
    Status(u16),

    #[error("service returned code {code}: {msg}")]
    Application { code: i64, msg: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// HTTP statuses that are retried; everything else fails immediately.
pub const RETRYABLE_STATUSES: [u16; 3] = [500, 429, 504];

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Status(code) => RETRYABLE_STATUSES.contains(code),
            ClientError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl From<ClientError> for ServiceError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Application { code, msg } => ServiceError::Application { code, msg },
            ClientError::Decode(msg) => ServiceError::Decode(msg),
            ClientError::RetriesExhausted { attempts, last } => {
                ServiceError::RetriesExhausted { attempts, last }
            }
            other => ServiceError::Transport(other.to_string()),
        }
    }
}
