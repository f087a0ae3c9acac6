//! Error taxonomy for per-machine operations.
//!
//! Every lifecycle operation returns [`MachineError`]. The CLI catches these
//! at the per-machine boundary, reports them, and moves on to the next
//! machine directory.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

pub type Result<T, E = MachineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Not running")]
    NotRunning,

    #[error("control channel {endpoint} unreachable: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot restrict permissions on {}: {reason}", .path.display())]
    Permission { path: PathBuf, reason: String },

    #[error("state file `{field}` holds an unusable value: {value:?}")]
    StateCorruption { field: &'static str, value: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal pid {pid}: {errno}")]
    Signal { pid: u32, errno: Errno },

    #[error("display secret rejected: {reason}")]
    InvalidSecret { reason: &'static str },
}

impl MachineError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        MachineError::Io {
            context: context.into(),
            source,
        }
    }
}
