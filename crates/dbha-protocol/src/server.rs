//! Report listener — controller side of the wire protocol.
//!
//! One task per detector connection. Each accepted frame is pushed onto
//! the dedup stage's bounded queue before `OK` is written back, so a
//! stalled pipeline back-pressures the sender. Read errors and EOF end
//! the connection task; reconnecting is the sender's job.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::FrameError;
use crate::frame::{ACK, Frame, FrameDecoder};

const READ_BUF_LEN: usize = 16 * 1024;

/// A decoded frame tagged with the connection it came from.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub peer: String,
    pub frame: Frame,
}

/// Per-connection counters, returned when the connection ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames: u64,
    pub rejected: u64,
}

/// Accept detector connections until shutdown.
pub async fn serve(
    listener: TcpListener,
    known: Arc<HashSet<String>>,
    tx: mpsc::Sender<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(addr = ?listener.local_addr().ok(), "report listener started");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let peer = peer.to_string();
                        debug!(%peer, "detector connected");
                        let decoder = FrameDecoder::new(Arc::clone(&known));
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            match handle_connection(stream, &peer, decoder, tx).await {
                                Ok(stats) => {
                                    debug!(%peer, frames = stats.frames, rejected = stats.rejected, "detector disconnected");
                                }
                                Err(e) => {
                                    warn!(%peer, error = %e, "detector connection closed");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("report listener shutting down");
                break;
            }
        }
    }
}

/// Drive one connection until EOF or a fatal error.
pub async fn handle_connection<S>(
    mut stream: S,
    peer: &str,
    mut decoder: FrameDecoder,
    tx: mpsc::Sender<Inbound>,
) -> Result<ConnectionStats, FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stats = ConnectionStats::default();
    let mut buf = vec![0u8; READ_BUF_LEN];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(stats);
        }

        for result in decoder.decode(&buf[..n]) {
            match result {
                Ok(frame) => {
                    tx.send(Inbound {
                        peer: peer.to_string(),
                        frame,
                    })
                    .await
                    .map_err(|_| FrameError::QueueClosed)?;
                    stream.write_all(ACK).await?;
                    stats.frames += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    stats.rejected += 1;
                    debug!(%peer, error = %e, "frame rejected");
                }
            }
        }
    }
}
