//! Lifecycle controller: start / stop / status / reboot / display.
//!
//! ## Architecture
//!
//! ```text
//! Controller::start(machine)
//!     └─► std::process::Command  →  emulator child (outlives kvmctl)
//!             └─► state/{pid, monport|monsock, vnc}
//! Controller::stop(machine)       SIGTERM, clear state, bounded exit poll
//! Controller::reboot(machine)     monitor: system_reset
//! Controller::request_display(m)  monitor: set_password vnc <fresh secret>
//! ```
//!
//! Every operation starts from disk plus a fresh liveness probe; nothing is
//! remembered between calls. A pid that probes `Dead` is cleared on the spot
//! together with its endpoints.
//!
//! Two invocations racing on the same machine can both pass the "not
//! running" check before either records a pid. There is no lock file; the
//! atomic state writes only guarantee that readers never see torn values.
//! Endpoints recorded without a pid are orphans from an interrupted start;
//! the next `start` clears them before recording its own.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use super::endpoint::{self, ControlEndpoint};
use super::liveness::{self, Liveness, Probe};
use super::state_store::{InstanceState, StateField};
use super::{MachineDir, monitor, options};
use crate::config::{ControllerConfig, MonitorMode};
use crate::error::{MachineError, Result};

/// Interval between liveness probes while waiting for a stopped instance.
const STOP_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// VNC authentication only honours the first eight characters.
const DISPLAY_SECRET_LEN: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub pid: u32,
    pub control: ControlEndpoint,
    pub display_index: u16,
    /// Full argument vector handed to the emulator.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StopOutcome {
    pub pid: u32,
    /// `false` when the process was still around after the stop timeout.
    pub exited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MachineStatus {
    Running {
        pid: u32,
        liveness: Liveness,
        /// The pid exists but belongs to another user.
        foreign: bool,
        control: Option<ControlEndpoint>,
        display_index: Option<u16>,
    },
    Stopped,
}

impl MachineStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, MachineStatus::Running { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub machine: String,
    pub options: Vec<String>,
    pub status: MachineStatus,
}

/// Everything an external VNC viewer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayParams {
    pub host: String,
    pub port: u16,
    pub password_file: PathBuf,
}

/// A recorded pid that did not probe `Dead`.
struct LiveInstance {
    pid: u32,
    probe: Probe,
    state: InstanceState,
}

pub struct Controller {
    config: ControllerConfig,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn machine(&self, path: impl Into<PathBuf>) -> MachineDir {
        MachineDir::new(path, &self.config)
    }

    /// Launch the emulator for `machine` unless an instance is still alive.
    pub fn start(&self, machine: &MachineDir) -> Result<StartOutcome> {
        if let Some(live) = self.live_instance(machine)? {
            return Err(MachineError::AlreadyRunning { pid: live.pid });
        }
        let orphans = machine.store().load()?;
        if orphans != InstanceState::default() {
            info!(machine = %machine.name(), "endpoints recorded without a pid, clearing them");
            self.clear(machine, &orphans)?;
        }

        let opts = options::resolve(machine)?;
        let control = endpoint::allocate_control(machine, &self.config)?;
        let display_index = endpoint::allocate_display(&self.config.listen_host, self.config.vnc_base_port)?;
        let args = self.launch_args(opts, &control, display_index);

        fs::create_dir_all(machine.state_dir())
            .map_err(|e| MachineError::io(format!("creating {}", machine.state_dir().display()), e))?;
        if let ControlEndpoint::Unix(path) = &control {
            remove_socket(path)?;
        }

        let mut cmd = Command::new(&self.config.emulator);
        cmd.args(&args).stdin(Stdio::null());
        if self.config.console_log {
            let log = OpenOptions::new()
                .create(true)
                .append(true)
                .open(machine.console_log())
                .map_err(|e| MachineError::io(format!("opening {}", machine.console_log().display()), e))?;
            let err_log = log
                .try_clone()
                .map_err(|e| MachineError::io("duplicating console log handle", e))?;
            cmd.stdout(log).stderr(err_log);
        }

        // The std Child is dropped without waiting: the emulator must outlive
        // this invocation and is tracked through the pid file from here on.
        let child = cmd.spawn().map_err(|source| MachineError::Spawn {
            program: self.config.emulator.clone(),
            source,
        })?;
        let pid = child.id();

        let mut state = InstanceState {
            pid: Some(pid),
            display_index: Some(display_index),
            ..Default::default()
        };
        match &control {
            ControlEndpoint::Tcp { port, .. } => state.monitor_port = Some(*port),
            ControlEndpoint::Unix(path) => state.monitor_socket = Some(path.clone()),
        }

        if let Err(e) = machine.store().record(&state) {
            warn!(machine = %machine.name(), pid, error = %e, "could not record instance, terminating it");
            let _ = liveness::terminate(pid);
            let _ = machine.store().clear_instance();
            return Err(e);
        }

        info!(
            machine = %machine.name(),
            pid,
            control = %control,
            display_index,
            "instance started"
        );

        Ok(StartOutcome {
            pid,
            control,
            display_index,
            args,
        })
    }

    /// Send SIGTERM to the recorded instance and clear its state.
    ///
    /// Waits at most `stop_timeout` for the pid to disappear; the outcome
    /// says whether it did. An emulator started by this same process stays a
    /// zombie until its parent reaps it, and a zombie still answers signal 0,
    /// so in that case `exited` is `false` unless the caller reaps the child
    /// concurrently.
    pub async fn stop(&self, machine: &MachineDir) -> Result<StopOutcome> {
        let live = self
            .live_instance(machine)?
            .ok_or(MachineError::NotRunning)?;
        let pid = live.pid;

        match liveness::terminate(pid) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => {
                info!(machine = %machine.name(), pid, "instance exited before SIGTERM");
            }
            Err(errno) => return Err(MachineError::Signal { pid, errno }),
        }

        self.clear(machine, &live.state)?;
        let exited = self.wait_for_exit(pid).await;
        if exited {
            info!(machine = %machine.name(), pid, "instance stopped");
        } else {
            warn!(
                machine = %machine.name(),
                pid,
                timeout_ms = self.config.stop_timeout_ms,
                "SIGTERM sent but process still present"
            );
        }
        Ok(StopOutcome { pid, exited })
    }

    /// Liveness of the recorded instance, clearing stale state on the way.
    pub fn status(&self, machine: &MachineDir) -> Result<MachineStatus> {
        let host = &self.config.listen_host;
        Ok(match self.live_instance(machine)? {
            Some(live) => MachineStatus::Running {
                pid: live.pid,
                liveness: live.probe.liveness,
                foreign: live.probe.foreign,
                control: live.state.control_endpoint(host),
                display_index: live.state.display_index,
            },
            None => MachineStatus::Stopped,
        })
    }

    /// Launch arguments plus status.
    pub fn info(&self, machine: &MachineDir) -> Result<StatusReport> {
        let options = options::resolve(machine)?;
        let status = self.status(machine)?;
        Ok(StatusReport {
            machine: machine.name(),
            options,
            status,
        })
    }

    pub async fn reboot(&self, machine: &MachineDir) -> Result<()> {
        let live = self
            .live_instance(machine)?
            .ok_or(MachineError::NotRunning)?;
        let endpoint = self.recorded_endpoint(&live.state)?;
        monitor::send(&endpoint, monitor::RESET, self.config.monitor_timeout()).await?;
        info!(machine = %machine.name(), pid = live.pid, "reset requested");
        Ok(())
    }

    /// Rotate the display secret and return viewer connection parameters.
    pub async fn request_display(&self, machine: &MachineDir) -> Result<DisplayParams> {
        let secret = generate_secret();
        self.change_display_secret(machine, &secret).await
    }

    /// Persist `secret` and push it to the running instance.
    ///
    /// If the push fails the previously recorded secret, if any, is put back:
    /// the instance still enforces it.
    pub async fn change_display_secret(&self, machine: &MachineDir, secret: &str) -> Result<DisplayParams> {
        validate_secret(secret)?;
        let live = self
            .live_instance(machine)?
            .ok_or(MachineError::NotRunning)?;
        let index = live.state.display_index.ok_or(MachineError::StateCorruption {
            field: StateField::DisplayIndex.file_name(),
            value: String::new(),
        })?;
        let port = self
            .config
            .vnc_base_port
            .checked_add(index)
            .ok_or_else(|| MachineError::StateCorruption {
                field: StateField::DisplayIndex.file_name(),
                value: index.to_string(),
            })?;
        let endpoint = self.recorded_endpoint(&live.state)?;

        let store = machine.store();
        let applied = store.read(StateField::DisplaySecret)?;
        store.write(StateField::DisplaySecret, secret)?;
        let command = monitor::set_vnc_password(secret);
        if let Err(e) = monitor::send(&endpoint, &command, self.config.monitor_timeout()).await {
            let restored = match &applied {
                Some(previous) => store.write(StateField::DisplaySecret, previous),
                None => store.clear(StateField::DisplaySecret),
            };
            if let Err(restore) = restored {
                warn!(machine = %machine.name(), error = %restore, "could not restore previous display secret");
            }
            return Err(e);
        }

        Ok(DisplayParams {
            host: self.config.listen_host.clone(),
            port,
            password_file: store.path(StateField::DisplaySecret),
        })
    }

    /// Administrative flags followed by the resolved options.
    pub fn launch_args(&self, opts: Vec<String>, control: &ControlEndpoint, display_index: u16) -> Vec<String> {
        let mut args = self.config.emulator_args.clone();
        args.push("-monitor".to_string());
        args.push(control.monitor_arg());
        args.push("-vnc".to_string());
        args.push(format!("{}:{},password", self.config.listen_host, display_index));
        args.extend(self.config.input_device.iter().cloned());
        args.extend(opts);
        args
    }

    fn live_instance(&self, machine: &MachineDir) -> Result<Option<LiveInstance>> {
        let state = machine.store().load()?;
        let Some(pid) = state.pid else {
            return Ok(None);
        };
        let probe = liveness::inspect(pid);
        if probe.liveness == Liveness::Dead {
            info!(machine = %machine.name(), pid, "recorded pid is gone, clearing stale state");
            self.clear(machine, &state)?;
            return Ok(None);
        }
        if probe.foreign {
            info!(machine = %machine.name(), pid, "recorded pid belongs to another user, treating it as running");
        }
        Ok(Some(LiveInstance { pid, probe, state }))
    }

    fn recorded_endpoint(&self, state: &InstanceState) -> Result<ControlEndpoint> {
        state
            .control_endpoint(&self.config.listen_host)
            .ok_or_else(|| MachineError::StateCorruption {
                field: match self.config.monitor {
                    MonitorMode::Tcp => StateField::MonitorPort.file_name(),
                    MonitorMode::Unix => StateField::MonitorSocket.file_name(),
                },
                value: String::new(),
            })
    }

    fn clear(&self, machine: &MachineDir, state: &InstanceState) -> Result<()> {
        machine.store().clear_instance()?;
        if let Some(path) = &state.monitor_socket {
            remove_socket(path)?;
        }
        Ok(())
    }

    async fn wait_for_exit(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.config.stop_timeout();
        loop {
            if liveness::probe(pid) == Liveness::Dead {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(STOP_POLL_INTERVAL).await;
        }
    }
}

fn remove_socket(path: &std::path::Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MachineError::io(format!("removing {}", path.display()), e)),
    }
}

/// The secret travels as one monitor argument on a CRLF-terminated line.
fn validate_secret(secret: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(MachineError::InvalidSecret { reason: "empty" });
    }
    if secret.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(MachineError::InvalidSecret {
            reason: "contains whitespace or control characters",
        });
    }
    Ok(())
}

fn generate_secret() -> String {
    let mut secret = uuid::Uuid::new_v4().simple().to_string();
    secret.truncate(DISPLAY_SECRET_LEN);
    secret
}
