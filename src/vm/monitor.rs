//! Line-oriented client for the emulator's human monitor.
//!
//! Each command opens a fresh connection, writes `<command>\r\n`, and closes.
//! Replies are not read. An unreachable endpoint is reported as
//! [`MachineError::Connection`] and never retried.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tracing::info;

use super::endpoint::ControlEndpoint;
use crate::error::{MachineError, Result};

/// Reset the guest as if the reset button were pressed.
pub const RESET: &str = "system_reset";

/// Command that replaces the VNC password.
pub fn set_vnc_password(secret: &str) -> String {
    format!("set_password vnc {secret}")
}

/// Deliver one command to `endpoint`.
pub async fn send(endpoint: &ControlEndpoint, command: &str, timeout: Duration) -> Result<()> {
    let outcome = match tokio::time::timeout(timeout, deliver(endpoint, command)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "monitor did not accept the command")),
    };
    outcome.map_err(|source| MachineError::Connection {
        endpoint: endpoint.to_string(),
        source,
    })?;

    // Only the verb is logged: password changes carry the secret.
    let verb = command.split_whitespace().next().unwrap_or_default();
    info!(%endpoint, command = verb, "monitor command sent");
    Ok(())
}

async fn deliver(endpoint: &ControlEndpoint, command: &str) -> io::Result<()> {
    match endpoint {
        ControlEndpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            write_line(stream, command).await
        }
        ControlEndpoint::Unix(path) => {
            let stream = UnixStream::connect(path).await?;
            write_line(stream, command).await
        }
    }
}

async fn write_line<S: AsyncWrite + Unpin>(mut stream: S, command: &str) -> io::Result<()> {
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    stream.shutdown().await
}
