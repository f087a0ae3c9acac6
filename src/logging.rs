//! Tracing setup for the CLI.
//!
//! Diagnostics go to stderr so stdout carries only per-machine results.
//! `RUST_LOG` overrides the level. With `KVMCTL_LOG=1` every event is also
//! appended to `kvmctl.log` in the log directory (see [`crate::paths`]),
//! and the default level drops from `warn` to `info` so lifecycle events
//! (starts, stops, self-healed state) are kept.

use std::path::PathBuf;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const FILE_SWITCH: &str = "KVMCTL_LOG";
const LOG_FILE: &str = "kvmctl.log";

/// Flushes the file writer when dropped. Hold it until `main` returns.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

pub fn init(log_dir: Option<PathBuf>) -> LogGuard {
    let to_file = file_switch_on(std::env::var(FILE_SWITCH).ok().as_deref());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(to_file)));

    let (writer, guard) = match to_file.then(|| file_writer(log_dir)) {
        Some(Ok((writer, guard))) => (Some(writer), Some(guard)),
        Some(Err(e)) => {
            eprintln!("kvmctl: file logging disabled: {e}");
            (None, None)
        }
        None => (None, None),
    };
    let file_layer = writer.map(|w| fmt::layer().with_writer(w).with_ansi(false));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .try_init();

    LogGuard { _file: guard }
}

fn file_switch_on(value: Option<&str>) -> bool {
    value == Some("1")
}

fn default_level(to_file: bool) -> &'static str {
    if to_file { "info" } else { "warn" }
}

fn file_writer(log_dir: Option<PathBuf>) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    let dir = log_dir.unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&dir)?;
    Ok(tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE)))
}
