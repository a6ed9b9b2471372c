//! Command results

use super::state::{ClusterPhase, ClusterState};
use crate::error::{ExitStatus, PortConflictError, ProvisionError};
use crate::network::ServiceEndpoint;
use crate::node::NodeStatus;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// Lifecycle command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Up,
    Down,
    Clean,
    Status,
}

impl Command {
    /// Whether an interrupt can cut this command short
    ///
    /// Only `up` unwinds on interrupt; the other commands keep the default
    /// signal behavior and stop immediately.
    pub fn is_interruptible(self) -> bool {
        matches!(self, Command::Up)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Up => write!(f, "up"),
            Command::Down => write!(f, "down"),
            Command::Clean => write!(f, "clean"),
            Command::Status => write!(f, "status"),
        }
    }
}

/// Result of one command for one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationOutcome {
    pub application: String,
    /// Status reached, or the last known status on failure
    pub status: NodeStatus,
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ProvisionError>,
}

impl ApplicationOutcome {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

fn serialize_error<E: fmt::Display, S: Serializer>(error: &Option<E>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Everything a lifecycle command did
#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: Command,
    /// Terminal phase
    pub phase: ClusterPhase,
    /// Per-application results; manifest order for `up`, reverse for `down`/`clean`
    pub outcomes: Vec<ApplicationOutcome>,
    /// Endpoints of running services
    pub endpoints: Vec<ServiceEndpoint>,
    /// Running nodes publishing the same host port; endpoints are withheld
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub conflict: Option<PortConflictError>,
    /// Node statuses observed after the command
    pub state: ClusterState,
    /// Whether the command was cut short by a signal
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CommandReport {
    /// Names of applications that failed
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failure())
            .map(|o| o.application.as_str())
            .collect()
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.interrupted {
            return ExitStatus::Partial;
        }
        if self.conflict.is_some() {
            return ExitStatus::PortConflict;
        }

        let failed = self.failed().len();
        match self.command {
            Command::Up => match self.phase {
                ClusterPhase::Up => ExitStatus::Success,
                ClusterPhase::PartiallyUp => ExitStatus::Partial,
                _ => ExitStatus::Failure,
            },
            Command::Down | Command::Clean if failed == 0 => ExitStatus::Success,
            Command::Down | Command::Clean if failed == self.outcomes.len() => ExitStatus::Failure,
            Command::Down | Command::Clean => ExitStatus::Partial,
            Command::Status => ExitStatus::Success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(command: Command, phase: ClusterPhase, failures: &[bool]) -> CommandReport {
        let outcomes = failures
            .iter()
            .enumerate()
            .map(|(i, failed)| ApplicationOutcome {
                application: format!("app{}", i),
                status: NodeStatus::Stopped,
                error: failed.then(|| ProvisionError::Command {
                    node: format!("app{}", i),
                    action: "stop".to_string(),
                    message: "boom".to_string(),
                }),
            })
            .collect();

        CommandReport {
            command,
            phase,
            outcomes,
            endpoints: Vec::new(),
            conflict: None,
            state: ClusterState::new(),
            interrupted: false,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(report(Command::Up, ClusterPhase::Up, &[false]).exit_status(), ExitStatus::Success);
        assert_eq!(
            report(Command::Up, ClusterPhase::PartiallyUp, &[false, true]).exit_status(),
            ExitStatus::Partial
        );
        assert_eq!(report(Command::Up, ClusterPhase::Error, &[true]).exit_status(), ExitStatus::Failure);
        assert_eq!(
            report(Command::Down, ClusterPhase::Down, &[false, true]).exit_status(),
            ExitStatus::Partial
        );
        assert_eq!(
            report(Command::Down, ClusterPhase::Down, &[true, true]).exit_status(),
            ExitStatus::Failure
        );

        let mut interrupted = report(Command::Up, ClusterPhase::Down, &[false]);
        interrupted.interrupted = true;
        assert_eq!(interrupted.exit_status(), ExitStatus::Partial);

        let mut conflicting = report(Command::Status, ClusterPhase::Up, &[false, false]);
        conflicting.conflict = Some(PortConflictError {
            port: 8080,
            first: "a".to_string(),
            second: "b".to_string(),
        });
        assert_eq!(conflicting.exit_status(), ExitStatus::PortConflict);
    }

    #[test]
    fn test_only_up_is_interruptible() {
        assert!(Command::Up.is_interruptible());
        assert!(!Command::Down.is_interruptible());
        assert!(!Command::Clean.is_interruptible());
        assert!(!Command::Status.is_interruptible());
    }

    #[test]
    fn test_report_serializes_errors_as_text() {
        let report = report(Command::Down, ClusterPhase::Down, &[false, true]);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["command"], "down");
        assert_eq!(json["phase"], "down");
        assert!(json["outcomes"][0].get("error").is_none());
        assert_eq!(json["outcomes"][1]["error"], "Failed to stop node app1: boom");
        assert_eq!(report.failed(), ["app1"]);
    }
}
