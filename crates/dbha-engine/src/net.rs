//! Low-level probe primitives: bounded connect, line exchange, SSH banner.

use std::time::Duration;

use dbha_core::{ProbeError, Status};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Longest response line accepted from a probed service.
const MAX_LINE: u64 = 512;

/// Connect to `addr` within `timeout`.
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream, ProbeError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProbeError::Connect(format!("{addr}: {e}"))),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Read one CRLF-terminated line, without the terminator.
pub async fn read_line(
    reader: &mut BufReader<TcpStream>,
    timeout: Duration,
) -> Result<String, ProbeError> {
    let mut line = String::new();
    let read = tokio::time::timeout(timeout, async {
        let mut limited = (&mut *reader).take(MAX_LINE);
        limited.read_line(&mut line).await
    })
    .await
    .map_err(|_| ProbeError::Timeout(timeout))?
    .map_err(|e| ProbeError::Protocol(e.to_string()))?;

    if read == 0 {
        return Err(ProbeError::Protocol("connection closed".to_string()));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Write `request` and read one line back.
pub async fn exchange(
    reader: &mut BufReader<TcpStream>,
    request: &[u8],
    timeout: Duration,
) -> Result<String, ProbeError> {
    tokio::time::timeout(timeout, reader.get_mut().write_all(request))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Protocol(e.to_string()))?;
    read_line(reader, timeout).await
}

/// Decide whether the host is alive when the engine did not answer.
///
/// The host counts as reachable when its SSH daemon accepts a connection
/// and greets with an `SSH-` banner.
pub async fn ssh_corroborate(ip: &str, ssh_port: u16, timeout: Duration) -> Status {
    let addr = format!("{ip}:{ssh_port}");
    let stream = match connect(&addr, timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%addr, error = %e, "ssh connect failed");
            return Status::SshCheckFailed;
        }
    };

    let mut reader = BufReader::new(stream);
    match read_line(&mut reader, timeout).await {
        Ok(banner) if banner.starts_with("SSH-") => Status::SshCheckOk,
        Ok(banner) => {
            debug!(%addr, %banner, "unexpected ssh banner");
            Status::SshCheckFailed
        }
        Err(e) => {
            debug!(%addr, error = %e, "ssh banner not received");
            Status::SshCheckFailed
        }
    }
}
