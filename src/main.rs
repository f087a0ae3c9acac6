//! kvmctl: start, stop and inspect directory-backed KVM machines.
//!
//! ```text
//! kvmctl <start|stop|info|status|reboot|display> [machine dir]...
//! ```
//!
//! Machines are processed one after another. A failure on one machine is
//! reported and the next machine is still processed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};

use kvmctl::operation::{Operation, Outcome};
use kvmctl::paths::KvmctlPaths;
use kvmctl::vm::{Controller, MachineStatus};
use kvmctl::{ControllerConfig, logging};

#[derive(Parser, Debug)]
#[command(name = "kvmctl", version, about = "Lifecycle control for directory-backed KVM machines")]
struct Args {
    /// Operation to perform on every machine
    #[arg(value_enum)]
    operation: Operation,

    /// Machine directories
    machines: Vec<PathBuf>,

    /// Config file (default: ~/.config/kvmctl/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print one JSON object per machine instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let paths = KvmctlPaths::resolve();
    let _log_guard = logging::init(paths.as_ref().map(|p| p.logs.clone()));

    if let Some(explicit) = &args.config {
        anyhow::ensure!(explicit.is_file(), "config file {} not found", explicit.display());
    }
    let config = match args.config.clone().or_else(|| paths.as_ref().map(|p| p.config_file())) {
        Some(path) => ControllerConfig::load(&path)?,
        None => ControllerConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    let controller = Controller::new(config);
    let mut failures = 0usize;

    for path in &args.machines {
        if !path.is_dir() {
            warn!(path = %path.display(), "not a directory, skipped");
            eprintln!("Skipping {}: not a directory", path.display());
            continue;
        }

        let machine = controller.machine(path);
        let name = machine.name();
        if !args.json {
            println!("Machine {name}");
        }

        match runtime.block_on(args.operation.run(&controller, &machine)) {
            Ok(outcome) => {
                if args.json {
                    println!("{}", serde_json::json!({ "machine": name, "result": outcome }));
                } else {
                    print_outcome(&outcome, controller.config().stop_timeout_ms);
                }
            }
            Err(e) => {
                failures += 1;
                error!(machine = %name, error = %e, "operation failed");
                if args.json {
                    println!("{}", serde_json::json!({ "machine": name, "error": e.to_string() }));
                } else {
                    println!("{e}");
                }
            }
        }

        if !args.json {
            println!();
        }
    }

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_outcome(outcome: &Outcome, stop_timeout_ms: u64) {
    match outcome {
        Outcome::Started(started) => {
            println!("\tArguments: {}", started.args.join(" "));
            println!("Started (pid {})", started.pid);
            println!("\tMonitor: {}", started.control);
            println!("\tVNC display: :{}", started.display_index);
        }
        Outcome::Stopped(stopped) => {
            println!("Stopped (pid {})", stopped.pid);
            if !stopped.exited {
                println!(
                    "\tNote: SIGTERM delivered but pid {} was still present after {} ms",
                    stopped.pid, stop_timeout_ms
                );
            }
        }
        Outcome::Info(report) => {
            println!("\tOptions:");
            for line in option_lines(&report.options) {
                println!("\t\t{line}");
            }
            print_status(&report.status);
        }
        Outcome::Status { status } => print_status(status),
        Outcome::Rebooted => println!("Reset sent"),
        Outcome::Display(display) => {
            println!("VNC: {}:{}", display.host, display.port);
            println!("\tPassword file: {}", display.password_file.display());
        }
    }
}

fn print_status(status: &MachineStatus) {
    match status {
        MachineStatus::Running { pid, foreign: true, .. } => println!("Running (pid {pid}, owned by another user)"),
        MachineStatus::Running { pid, .. } => println!("Running (pid {pid})"),
        MachineStatus::Stopped => println!("Stopped"),
    }
}

/// Pair each flag with the value token that follows it, if any.
fn option_lines(options: &[String]) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for token in options {
        match lines.last_mut() {
            Some(last) if !token.starts_with('-') && !last.contains(' ') => {
                last.push(' ');
                last.push_str(token);
            }
            _ => lines.push(token.clone()),
        }
    }
    lines
}
