//! Per-machine runtime state files.
//!
//! Each [`StateField`] maps to exactly one small text file in the machine's
//! state directory; presence of the file means presence of the value.
//! Nothing is cached: every read goes back to disk.
//!
//! Writes replace the file atomically (temp file in the same directory, then
//! rename) so a concurrent reader never sees a half-written value. The
//! display secret is created owner-only before any content is written.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::endpoint::ControlEndpoint;
use crate::error::{MachineError, Result};

const PUBLIC_MODE: u32 = 0o644;
const SECRET_MODE: u32 = 0o600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    Pid,
    MonitorPort,
    MonitorSocket,
    DisplayIndex,
    DisplaySecret,
}

impl StateField {
    pub const ALL: [StateField; 5] = [
        StateField::Pid,
        StateField::MonitorPort,
        StateField::MonitorSocket,
        StateField::DisplayIndex,
        StateField::DisplaySecret,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            StateField::Pid => "pid",
            StateField::MonitorPort => "monport",
            StateField::MonitorSocket => "monsock",
            StateField::DisplayIndex => "vnc",
            StateField::DisplaySecret => "vncpass",
        }
    }

    fn is_secret(self) -> bool {
        matches!(self, StateField::DisplaySecret)
    }
}

/// Snapshot of everything recorded about an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceState {
    pub pid: Option<u32>,
    pub monitor_port: Option<u16>,
    pub monitor_socket: Option<PathBuf>,
    pub display_index: Option<u16>,
    pub display_secret: Option<String>,
}

impl InstanceState {
    /// The recorded control endpoint, TCP taking precedence.
    pub fn control_endpoint(&self, host: &str) -> Option<ControlEndpoint> {
        if let Some(port) = self.monitor_port {
            return Some(ControlEndpoint::Tcp {
                host: host.to_string(),
                port,
            });
        }
        self.monitor_socket.clone().map(ControlEndpoint::Unix)
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, field: StateField) -> PathBuf {
        self.dir.join(field.file_name())
    }

    /// Read a field's content exactly as stored, `None` when the file is
    /// absent.
    pub fn read(&self, field: StateField) -> Result<Option<String>> {
        let path = self.path(field);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MachineError::io(format!("reading {}", path.display()), e)),
        }
    }

    /// Create or replace a field's file.
    pub fn write(&self, field: StateField, value: &str) -> Result<()> {
        let target = self.path(field);
        fs::create_dir_all(&self.dir)
            .map_err(|e| MachineError::io(format!("creating {}", self.dir.display()), e))?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| MachineError::io(format!("creating temp file in {}", self.dir.display()), e))?;

        let mode = if field.is_secret() { SECRET_MODE } else { PUBLIC_MODE };
        if let Err(e) = fs::set_permissions(temp.path(), fs::Permissions::from_mode(mode)) {
            if field.is_secret() {
                return Err(MachineError::Permission {
                    path: target,
                    reason: e.to_string(),
                });
            }
            warn!(path = %temp.path().display(), error = %e, "failed to set state file permissions");
        }

        let file = temp.as_file_mut();
        file.write_all(value.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| MachineError::io(format!("writing {}", target.display()), e))?;

        temp.persist(&target)
            .map_err(|e| MachineError::io(format!("replacing {}", target.display()), e.error))?;

        if field.is_secret() {
            verify_owner_only(&target)?;
        }
        debug!(path = %target.display(), "state written");
        Ok(())
    }

    /// Remove a field's file. Absent files are fine.
    pub fn clear(&self, field: StateField) -> Result<()> {
        let path = self.path(field);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "state cleared");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MachineError::io(format!("removing {}", path.display()), e)),
        }
    }

    /// Remove every instance field.
    pub fn clear_instance(&self) -> Result<()> {
        for field in StateField::ALL {
            self.clear(field)?;
        }
        Ok(())
    }

    /// Content with surrounding whitespace dropped, for numbers and paths.
    fn read_trimmed(&self, field: StateField) -> Result<Option<String>> {
        Ok(self.read(field)?.map(|raw| raw.trim().to_string()))
    }

    pub fn pid(&self) -> Result<Option<u32>> {
        let Some(raw) = self.read_trimmed(StateField::Pid)? else {
            return Ok(None);
        };
        match raw.parse::<i64>() {
            // 0 and negatives would address process groups when signalled.
            Ok(pid) if pid > 0 && pid <= i64::from(i32::MAX) => Ok(Some(pid as u32)),
            _ => Err(MachineError::StateCorruption {
                field: StateField::Pid.file_name(),
                value: raw,
            }),
        }
    }

    fn read_port(&self, field: StateField) -> Result<Option<u16>> {
        let Some(raw) = self.read_trimmed(field)? else {
            return Ok(None);
        };
        match raw.parse::<u16>() {
            Ok(port) if field != StateField::MonitorPort || port != 0 => Ok(Some(port)),
            _ => Err(MachineError::StateCorruption {
                field: field.file_name(),
                value: raw,
            }),
        }
    }

    pub fn load(&self) -> Result<InstanceState> {
        Ok(InstanceState {
            pid: self.pid()?,
            monitor_port: self.read_port(StateField::MonitorPort)?,
            monitor_socket: self.read_trimmed(StateField::MonitorSocket)?.map(PathBuf::from),
            display_index: self.read_port(StateField::DisplayIndex)?,
            display_secret: self.read(StateField::DisplaySecret)?,
        })
    }

    /// Persist every present field of `state`. The pid goes last so a
    /// concurrent reader never sees a pid without its endpoints.
    pub fn record(&self, state: &InstanceState) -> Result<()> {
        if let Some(port) = state.monitor_port {
            self.write(StateField::MonitorPort, &port.to_string())?;
        }
        if let Some(path) = &state.monitor_socket {
            self.write(StateField::MonitorSocket, &path.to_string_lossy())?;
        }
        if let Some(index) = state.display_index {
            self.write(StateField::DisplayIndex, &index.to_string())?;
        }
        if let Some(secret) = &state.display_secret {
            self.write(StateField::DisplaySecret, secret)?;
        }
        if let Some(pid) = state.pid {
            self.write(StateField::Pid, &pid.to_string())?;
        }
        Ok(())
    }
}

fn verify_owner_only(path: &Path) -> Result<()> {
    let mode = fs::metadata(path)
        .map_err(|e| MachineError::io(format!("stat {}", path.display()), e))?
        .permissions()
        .mode();
    if mode & 0o077 != 0 {
        let _ = fs::remove_file(path);
        return Err(MachineError::Permission {
            path: path.to_path_buf(),
            reason: format!("filesystem kept mode {:o}", mode & 0o777),
        });
    }
    Ok(())
}
