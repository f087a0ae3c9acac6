//! Directory layout for kvmctl's own files.
//!
//! - Config: `$XDG_CONFIG_HOME/kvmctl/` or `~/.config/kvmctl/`
//! - Logs:   `$XDG_DATA_HOME/kvmctl/logs/` or `~/.local/share/kvmctl/logs/`
//!
//! Machine directories are not resolved here; they are passed on the command
//! line.

use std::path::{Path, PathBuf};

const APP_NAME: &str = "kvmctl";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone)]
pub struct KvmctlPaths {
    pub config: PathBuf,
    pub logs: PathBuf,
}

impl KvmctlPaths {
    /// Resolve from the environment. Does not create anything.
    pub fn resolve() -> Option<Self> {
        let home = std::env::var("HOME").ok().map(PathBuf::from)?;
        Some(Self {
            config: resolve_config_dir(&home),
            logs: resolve_log_dir(&home),
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config.join(CONFIG_FILE)
    }
}

fn resolve_config_dir(home: &Path) -> PathBuf {
    match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join(APP_NAME),
        _ => home.join(".config").join(APP_NAME),
    }
}

fn resolve_log_dir(home: &Path) -> PathBuf {
    match std::env::var("XDG_DATA_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join(APP_NAME).join("logs"),
        _ => home.join(".local").join("share").join(APP_NAME).join("logs"),
    }
}
