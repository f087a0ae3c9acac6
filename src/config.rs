//! Controller configuration.
//!
//! All tunables (emulator binary, monitor transport, display base port,
//! timeouts) are gathered into a single `ControllerConfig` that is read from
//! `~/.config/kvmctl/config.toml`. Every field has a default, so a missing
//! file or a partial file is fine.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Transport used for the instance's administrative monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    /// Unix stream socket at `<state_dir>/monitor.sock`.
    Unix,
    /// Ephemeral TCP port on `listen_host`.
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub emulator: String,
    /// Tokens placed before every generated argument.
    pub emulator_args: Vec<String>,
    pub monitor: MonitorMode,
    pub listen_host: String,
    pub vnc_base_port: u16,
    pub input_device: Vec<String>,
    pub state_dir: String,
    pub conf_dir: String,
    pub monitor_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    /// Send the emulator's stdout/stderr to `<state_dir>/console.log`.
    pub console_log: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            emulator: "kvm".to_string(),
            emulator_args: Vec::new(),
            monitor: MonitorMode::Unix,
            listen_host: "127.0.0.1".to_string(),
            vnc_base_port: 5900,
            input_device: vec!["-usbdevice".to_string(), "tablet".to_string()],
            state_dir: "state".to_string(),
            conf_dir: "conf".to_string(),
            monitor_timeout_ms: 2000,
            stop_timeout_ms: 3000,
            console_log: true,
        }
    }
}

impl ControllerConfig {
    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }
}
