//! kvmctl: lifecycle control for directory-backed KVM virtual machines.
//!
//! Each machine is a directory of disk images and option fragments. The
//! controller turns it into an emulator command line, tracks the running
//! instance through small state files, and talks to the instance's monitor
//! for resets and VNC password changes.

pub mod config;
pub mod error;
pub mod logging;
pub mod operation;
pub mod paths;
pub mod vm;

pub use config::{ControllerConfig, MonitorMode};
pub use error::MachineError;
pub use operation::{Operation, Outcome};
pub use vm::{Controller, MachineDir};
