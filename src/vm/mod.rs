//! Machine-directory lifecycle management.
//!
//! A machine is a directory holding disk images (`hda.img`, `cdrom.iso`, ...),
//! a `conf/` directory of option fragments, and a `state/` directory with the
//! runtime files of a live instance (pid, monitor endpoint, VNC display).
//!
//! ```text
//! Controller::start(machine)
//!     ├─► liveness::probe(pid)          refuses if still alive
//!     ├─► options::resolve(machine)     disk + conf fragments
//!     ├─► endpoint::allocate_*          monitor + VNC display
//!     ├─► std::process::Command         emulator child
//!     └─► StateStore                    pid / monport|monsock / vnc
//! ```

use std::path::{Path, PathBuf};

use crate::config::ControllerConfig;

pub mod endpoint;
pub mod lifecycle;
pub mod liveness;
pub mod monitor;
pub mod options;
pub mod state_store;

/// A machine directory as seen by the controller.
///
/// The directory itself is managed externally; the controller only reads
/// disk-image names and conf fragments, and writes inside the state
/// subdirectory.
#[derive(Debug, Clone)]
pub struct MachineDir {
    root: PathBuf,
    state_dir: PathBuf,
    conf_dir: PathBuf,
}

impl MachineDir {
    pub fn new(root: impl Into<PathBuf>, config: &ControllerConfig) -> Self {
        let root = root.into();
        Self {
            state_dir: root.join(&config.state_dir),
            conf_dir: root.join(&config.conf_dir),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    /// Socket path used when the monitor runs over a Unix socket.
    pub fn monitor_socket(&self) -> PathBuf {
        self.state_dir.join("monitor.sock")
    }

    pub fn console_log(&self) -> PathBuf {
        self.state_dir.join("console.log")
    }

    /// Display name: the last path component.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string())
    }

    pub fn store(&self) -> state_store::StateStore {
        state_store::StateStore::new(&self.state_dir)
    }
}

pub use endpoint::ControlEndpoint;
pub use lifecycle::{Controller, DisplayParams, MachineStatus, StartOutcome, StatusReport, StopOutcome};
pub use liveness::{Liveness, Probe};
pub use state_store::{InstanceState, StateField, StateStore};
