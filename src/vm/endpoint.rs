//! Control and display endpoint allocation.
//!
//! Ports come from the kernel's ephemeral range: bind port 0, read the
//! assigned number, release it. Another process can claim the port before the
//! emulator binds it, so allocation is best effort.

use std::fmt;
use std::net::TcpListener;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::{ControllerConfig, MonitorMode};
use crate::error::{MachineError, Result};

use super::MachineDir;

/// Attempts at finding a port above the display base.
const DISPLAY_ALLOC_ATTEMPTS: usize = 8;

/// Where the instance's administrative monitor listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlEndpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl ControlEndpoint {
    /// The emulator's `-monitor` argument value.
    pub fn monitor_arg(&self) -> String {
        match self {
            ControlEndpoint::Tcp { host, port } => format!("tcp:{host}:{port},server,nowait"),
            ControlEndpoint::Unix(path) => format!("unix:{},server,nowait", path.display()),
        }
    }
}

impl fmt::Display for ControlEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlEndpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            ControlEndpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Ask the kernel for a free port on `host` and release it immediately.
pub fn allocate_port(host: &str) -> Result<u16> {
    let listener = TcpListener::bind((host, 0))
        .map_err(|e| MachineError::io(format!("binding ephemeral port on {host}"), e))?;
    let port = listener
        .local_addr()
        .map_err(|e| MachineError::io("reading ephemeral port", e))?
        .port();
    drop(listener);
    Ok(port)
}

/// Allocate a display port and return its index relative to `base`.
pub fn allocate_display(host: &str, base: u16) -> Result<u16> {
    for _ in 0..DISPLAY_ALLOC_ATTEMPTS {
        let port = allocate_port(host)?;
        if let Some(index) = port.checked_sub(base) {
            return Ok(index);
        }
        tracing::debug!(port, base, "ephemeral port below display base, retrying");
    }
    Err(MachineError::io(
        format!("allocating a display port above {base}"),
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "ephemeral range below base"),
    ))
}

/// Pick the control endpoint for a new instance of `machine`.
pub fn allocate_control(machine: &MachineDir, config: &ControllerConfig) -> Result<ControlEndpoint> {
    match config.monitor {
        MonitorMode::Tcp => Ok(ControlEndpoint::Tcp {
            host: config.listen_host.clone(),
            port: allocate_port(&config.listen_host)?,
        }),
        MonitorMode::Unix => Ok(ControlEndpoint::Unix(machine.monitor_socket())),
    }
}
