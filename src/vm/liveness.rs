//! Process liveness probing.
//!
//! A recorded pid is checked with signal 0, which delivers nothing but
//! reports whether the pid can be signalled:
//!
//! | `kill(pid, 0)` | classification |
//! |---|---|
//! | success | `Alive` |
//! | `ESRCH` | `Dead` (stale state, caller clears it) |
//! | `EPERM` | `Alive`, flagged as foreign |
//! | any other error | `Alive` |
//!
//! A pid owned by someone else may still be our emulator, and a double
//! launch against the same disk images is worse than a stale record.
//! `Unknown` is reserved for pids that cannot be addressed at all (zero or
//! beyond the platform's pid range); those are never signalled.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Alive,
    Dead,
    Unknown,
}

impl Liveness {
    /// Whether the lifecycle controller must treat the instance as running.
    pub fn is_running(self) -> bool {
        !matches!(self, Liveness::Dead)
    }
}

/// Result of one signal-0 probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub liveness: Liveness,
    /// The pid exists but this user may not signal it.
    pub foreign: bool,
}

/// Probe `pid`. Never cached: call again for every decision.
pub fn probe(pid: u32) -> Liveness {
    inspect(pid).liveness
}

/// Like [`probe`], also reporting whether the pid belongs to another user.
pub fn inspect(pid: u32) -> Probe {
    let Some(raw) = addressable(pid) else {
        return Probe {
            liveness: Liveness::Unknown,
            foreign: false,
        };
    };
    match kill(Pid::from_raw(raw), None::<Signal>) {
        Ok(()) => Probe {
            liveness: Liveness::Alive,
            foreign: false,
        },
        Err(Errno::ESRCH) => Probe {
            liveness: Liveness::Dead,
            foreign: false,
        },
        Err(Errno::EPERM) => Probe {
            liveness: Liveness::Alive,
            foreign: true,
        },
        Err(errno) => {
            tracing::debug!(pid, %errno, "unexpected probe error, assuming alive");
            Probe {
                liveness: Liveness::Alive,
                foreign: false,
            }
        }
    }
}

/// Send SIGTERM to `pid`. Delivery only; exit is not awaited.
pub fn terminate(pid: u32) -> Result<(), Errno> {
    let raw = addressable(pid).ok_or(Errno::EINVAL)?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
}

/// 0 and negatives would address process groups.
fn addressable(pid: u32) -> Option<i32> {
    i32::try_from(pid).ok().filter(|raw| *raw > 0)
}
