//! Command names and their handlers.
//!
//! The operation is parsed and validated before any machine directory is
//! touched; [`Operation::run`] then maps it onto the matching
//! [`Controller`] method for one machine.

use clap::ValueEnum;
use serde::Serialize;

use crate::error::Result;
use crate::vm::{Controller, DisplayParams, MachineDir, MachineStatus, StartOutcome, StatusReport, StopOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    /// Launch the emulator for each machine
    Start,
    /// Send SIGTERM to each running instance
    Stop,
    /// Show launch options and liveness
    Info,
    /// Show liveness only
    Status,
    /// Reset the guest through the monitor
    Reboot,
    /// Rotate the VNC password and print viewer parameters
    Display,
}

/// Result of one operation on one machine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Outcome {
    Started(StartOutcome),
    Stopped(StopOutcome),
    Info(StatusReport),
    Status { status: MachineStatus },
    Rebooted,
    Display(DisplayParams),
}

impl Operation {
    pub async fn run(self, controller: &Controller, machine: &MachineDir) -> Result<Outcome> {
        Ok(match self {
            Operation::Start => Outcome::Started(controller.start(machine)?),
            Operation::Stop => Outcome::Stopped(controller.stop(machine).await?),
            Operation::Info => Outcome::Info(controller.info(machine)?),
            Operation::Status => Outcome::Status {
                status: controller.status(machine)?,
            },
            Operation::Reboot => {
                controller.reboot(machine).await?;
                Outcome::Rebooted
            }
            Operation::Display => Outcome::Display(controller.request_display(machine).await?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;

    #[test]
    fn names_parse_case_sensitively() {
        assert_eq!(Operation::from_str("start", false), Ok(Operation::Start));
        assert_eq!(Operation::from_str("display", false), Ok(Operation::Display));
        assert!(Operation::from_str("restart", false).is_err());
        assert!(Operation::from_str("START", false).is_err());
    }

    #[test]
    fn every_operation_has_a_name() {
        let names: Vec<String> = Operation::value_variants()
            .iter()
            .filter_map(|op| op.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(names, vec!["start", "stop", "info", "status", "reboot", "display"]);
    }

    #[tokio::test]
    async fn status_on_clean_machine() {
        let tmp = tempfile::TempDir::new().unwrap();
        let controller = Controller::new(ControllerConfig::default());
        let machine = controller.machine(tmp.path());
        let outcome = Operation::Status.run(&controller, &machine).await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::Status {
                status: MachineStatus::Stopped
            }
        ));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["operation"], "status");
        assert_eq!(json["status"]["state"], "stopped");
    }
}
