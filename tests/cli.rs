//! Command-line behaviour across several machine directories.
//!
//! The binary runs with `HOME` pointed at a scratch directory and an explicit
//! config file, so nothing from the invoking user's setup leaks in.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use nix::sys::signal::Signal;

struct Workspace {
    tmp: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "stop_timeout_ms = 200\n").unwrap();
        Self { tmp }
    }

    fn machine(&self, name: &str) -> PathBuf {
        let dir = self.tmp.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn run(&self, args: &[&str], machines: &[&Path]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_kvmctl"))
            .args(args)
            .args(machines)
            .arg("--config")
            .arg(self.tmp.path().join("config.toml"))
            .env("HOME", self.tmp.path())
            .env_remove("XDG_CONFIG_HOME")
            .env_remove("XDG_DATA_HOME")
            .env_remove("KVMCTL_LOG")
            .output()
            .expect("run kvmctl")
    }
}

fn record_pid(machine: &Path, pid: u32) {
    let state = machine.join("state");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(state.join("pid"), pid.to_string()).unwrap();
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("{needle:?} missing from output:\n{haystack}"))
}

#[test]
fn failing_machine_does_not_stop_the_next_one() {
    let ws = Workspace::new();
    let idle = ws.machine("alpha");
    let busy = ws.machine("beta");
    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    record_pid(&busy, child.id());

    let out = ws.run(&["stop"], &[&idle, &busy]);
    let stdout = String::from_utf8_lossy(&out.stdout);

    let alpha = position(&stdout, "Machine alpha");
    let not_running = position(&stdout, "Not running");
    let beta = position(&stdout, "Machine beta");
    let stopped = position(&stdout, &format!("Stopped (pid {})", child.id()));
    assert!(alpha < not_running && not_running < beta && beta < stopped, "{stdout}");

    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(1));
    assert!(!busy.join("state/pid").exists());
    assert_eq!(child.wait().unwrap().signal(), Some(Signal::SIGTERM as i32));
}

#[test]
fn all_machines_succeeding_exits_zero() {
    let ws = Workspace::new();
    let a = ws.machine("alpha");
    let b = ws.machine("beta");

    let out = ws.run(&["status", "--json"], &[&a, &b]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let lines: Vec<serde_json::Value> = String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["machine"], "alpha");
    assert_eq!(lines[1]["machine"], "beta");
    assert_eq!(lines[1]["result"]["status"]["state"], "stopped");
}

#[test]
fn non_directory_is_skipped_and_processing_continues() {
    let ws = Workspace::new();
    let file = ws.tmp.path().join("not-a-machine");
    std::fs::write(&file, b"").unwrap();
    let a = ws.machine("alpha");

    let out = ws.run(&["status"], &[&file, &a]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not a directory"));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(!stdout.contains("Machine not-a-machine"));
    position(&stdout, "Machine alpha");
}

#[test]
fn unknown_operation_touches_no_machine() {
    let ws = Workspace::new();
    let busy = ws.machine("beta");
    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    record_pid(&busy, child.id());

    let out = ws.run(&["restart"], &[&busy]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
    assert!(busy.join("state/pid").exists());

    child.kill().unwrap();
    child.wait().unwrap();
}
