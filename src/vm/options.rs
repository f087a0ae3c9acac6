//! Launch-argument resolution from a machine directory.
//!
//! Two sources feed the argument list, in this order:
//!
//! 1. Disk images. For each role in [`DISK_ROLES`] the directory is searched
//!    for entries whose name starts with the role name. Exactly one match
//!    emits `-<role> <path>`; zero or several matches skip the role.
//! 2. Conf fragments. Each file in the conf directory contributes one
//!    `-<file name>` flag per line, followed by the trimmed line when it is
//!    non-empty. Lines starting with `#` are headers and emit nothing.
//!
//! ```text
//! vm/hda.img              ─► -hda vm/hda.img
//! vm/hdb1.img vm/hdb2.img ─► (ambiguous, skipped)
//! vm/conf/boot  "c\n\n"   ─► -boot c -boot
//! ```
//!
//! Both directory scans are sorted by name so the same contents always give
//! the same argument list.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::MachineDir;
use crate::error::{MachineError, Result};

/// Disk roles in emission order.
pub const DISK_ROLES: [&str; 7] = ["fda", "fdb", "hda", "hdb", "hdc", "hdd", "cdrom"];

/// Build the ordered argument list for `machine`.
pub fn resolve(machine: &MachineDir) -> Result<Vec<String>> {
    let mut opts = disk_args(machine.root())?;
    opts.extend(conf_args(machine.conf_dir())?);
    Ok(opts)
}

fn disk_args(root: &Path) -> Result<Vec<String>> {
    let names = sorted_entries(root)?;
    let mut opts = Vec::new();
    for role in DISK_ROLES {
        let matches: Vec<&PathBuf> = names
            .iter()
            .filter(|p| file_name(p).is_some_and(|n| n.starts_with(role)))
            .collect();
        match matches.as_slice() {
            [only] => {
                opts.push(format!("-{role}"));
                opts.push(only.display().to_string());
            }
            [] => {}
            several => {
                debug!(role, candidates = several.len(), "ambiguous disk role, skipped");
            }
        }
    }
    Ok(opts)
}

fn conf_args(conf_dir: &Path) -> Result<Vec<String>> {
    if !conf_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut opts = Vec::new();
    for path in sorted_entries(conf_dir)? {
        let Some(name) = file_name(&path) else {
            continue;
        };
        if name.starts_with('.') || !path.is_file() {
            continue;
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| MachineError::io(format!("reading {}", path.display()), e))?;
        for line in content.lines() {
            let value = line.trim();
            if value.starts_with('#') {
                continue;
            }
            opts.push(format!("-{name}"));
            if !value.is_empty() {
                opts.push(value.to_string());
            }
        }
    }
    Ok(opts)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = fs::read_dir(dir).map_err(|e| MachineError::io(format!("listing {}", dir.display()), e))?;
    let mut paths = read
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| MachineError::io(format!("listing {}", dir.display()), e))?;
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;

    fn machine() -> (tempfile::TempDir, MachineDir) {
        let tmp = tempfile::TempDir::new().unwrap();
        let m = MachineDir::new(tmp.path(), &ControllerConfig::default());
        (tmp, m)
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    fn p(m: &MachineDir, name: &str) -> String {
        m.root().join(name).display().to_string()
    }

    #[test]
    fn empty_directory_resolves_to_nothing() {
        let (_tmp, m) = machine();
        assert!(resolve(&m).unwrap().is_empty());
    }

    #[test]
    fn single_match_emits_role_and_path() {
        let (_tmp, m) = machine();
        touch(&m.root().join("hda.qcow2"));
        touch(&m.root().join("cdrom-install.iso"));
        assert_eq!(
            resolve(&m).unwrap(),
            vec![
                "-hda".to_string(),
                p(&m, "hda.qcow2"),
                "-cdrom".to_string(),
                p(&m, "cdrom-install.iso"),
            ]
        );
    }

    #[test]
    fn roles_follow_fixed_order_not_name_order() {
        let (_tmp, m) = machine();
        touch(&m.root().join("cdrom.iso"));
        touch(&m.root().join("fda.img"));
        touch(&m.root().join("hdd.img"));
        let opts = resolve(&m).unwrap();
        let flags: Vec<&str> = opts.iter().filter(|o| o.starts_with('-')).map(String::as_str).collect();
        assert_eq!(flags, vec!["-fda", "-hdd", "-cdrom"]);
    }

    #[test]
    fn ambiguous_role_is_skipped() {
        let (_tmp, m) = machine();
        touch(&m.root().join("hdb1.img"));
        touch(&m.root().join("hdb2.img"));
        assert!(resolve(&m).unwrap().is_empty());
    }

    #[test]
    fn disk_and_conf_scenario() {
        let (_tmp, m) = machine();
        touch(&m.root().join("hda.img"));
        touch(&m.root().join("hdb1.img"));
        touch(&m.root().join("hdb2.img"));
        fs::create_dir_all(m.conf_dir()).unwrap();
        fs::write(m.conf_dir().join("boot"), "c\n\n").unwrap();

        assert_eq!(
            resolve(&m).unwrap(),
            vec![
                "-hda".to_string(),
                p(&m, "hda.img"),
                "-boot".to_string(),
                "c".to_string(),
                "-boot".to_string(),
            ]
        );
    }

    #[test]
    fn conf_lines_are_trimmed_and_repeat_the_flag() {
        let (_tmp, m) = machine();
        fs::create_dir_all(m.conf_dir()).unwrap();
        fs::write(m.conf_dir().join("net"), "  nic,model=virtio \nuser\n").unwrap();
        assert_eq!(resolve(&m).unwrap(), vec!["-net", "nic,model=virtio", "-net", "user"]);
    }

    // Legacy behaviour iterated entries in raw directory order; sorting makes
    // the output reproducible.
    #[test]
    fn conf_entries_are_sorted_by_name() {
        let (_tmp, m) = machine();
        fs::create_dir_all(m.conf_dir()).unwrap();
        fs::write(m.conf_dir().join("smp"), "2\n").unwrap();
        fs::write(m.conf_dir().join("m"), "1024\n").unwrap();
        fs::write(m.conf_dir().join("boot"), "d\n").unwrap();
        assert_eq!(
            resolve(&m).unwrap(),
            vec!["-boot", "d", "-m", "1024", "-smp", "2"]
        );
    }

    #[test]
    fn header_lines_dotfiles_and_subdirs_emit_nothing() {
        let (_tmp, m) = machine();
        fs::create_dir_all(m.conf_dir().join("nested")).unwrap();
        fs::write(m.conf_dir().join(".m.swp"), "junk\n").unwrap();
        fs::write(m.conf_dir().join("m"), "# memory in MiB\n512\n").unwrap();
        assert_eq!(resolve(&m).unwrap(), vec!["-m", "512"]);
    }

    #[test]
    fn conf_dir_is_not_a_disk_candidate() {
        // `conf` starts with none of the role names; `cdrom` does not match `conf`.
        let (_tmp, m) = machine();
        fs::create_dir_all(m.conf_dir()).unwrap();
        assert!(resolve(&m).unwrap().is_empty());
    }

    #[test]
    fn resolve_is_stable_across_calls() {
        let (_tmp, m) = machine();
        touch(&m.root().join("hda.img"));
        fs::create_dir_all(m.conf_dir()).unwrap();
        fs::write(m.conf_dir().join("m"), "256\n").unwrap();
        assert_eq!(resolve(&m).unwrap(), resolve(&m).unwrap());
    }

    #[test]
    fn missing_machine_dir_is_an_error() {
        let m = MachineDir::new("/nonexistent/kvmctl/machine", &ControllerConfig::default());
        assert!(matches!(resolve(&m), Err(MachineError::Io { .. })));
    }
}
