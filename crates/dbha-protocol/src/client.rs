//! Report sender — detector side of the wire protocol.
//!
//! Keeps one persistent connection per controller and waits for the
//! `OK` acknowledgement after every frame. A failed exchange drops the
//! connection and the send is retried once over a fresh one.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::FrameError;
use crate::frame::{ACK, encode_frame};

/// Persistent, self-reconnecting connection to one controller.
#[derive(Debug)]
pub struct ReportClient {
    addr: String,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl ReportClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            stream: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send one report and wait for its acknowledgement.
    pub async fn send(&mut self, engine_type: &str, body: &[u8]) -> Result<(), FrameError> {
        let wire = encode_frame(engine_type, body);

        let mut last_err = None;
        for attempt in 0..2 {
            if self.stream.is_none() {
                self.stream = Some(self.connect().await?);
            }
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };

            match exchange(stream, &wire, self.timeout).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.stream = None;
                    debug!(addr = %self.addr, attempt, error = %e, "report exchange failed");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.unwrap_or(FrameError::Timeout(self.timeout));
        warn!(addr = %self.addr, error = %err, "report not delivered");
        Err(err)
    }

    async fn connect(&self) -> Result<TcpStream, FrameError> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| FrameError::Timeout(self.timeout))??;
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "connected to controller");
        Ok(stream)
    }
}

async fn exchange(stream: &mut TcpStream, wire: &[u8], timeout: Duration) -> Result<(), FrameError> {
    tokio::time::timeout(timeout, async {
        stream.write_all(wire).await?;
        let mut ack = [0u8; 2];
        stream.read_exact(&mut ack).await?;
        if &ack != ACK {
            return Err(FrameError::BadAck(ack.to_vec()));
        }
        Ok(())
    })
    .await
    .map_err(|_| FrameError::Timeout(timeout))?
}
