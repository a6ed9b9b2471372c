//! Error types for cluster-compose

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for cluster-compose operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Top-level error for a single command invocation
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    PortConflict(#[from] PortConflictError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Template error: {0}")]
    Template(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClusterError {
    /// Process exit status for this error
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            ClusterError::Validation(_) => ExitStatus::Invalid,
            ClusterError::PortConflict(_) => ExitStatus::PortConflict,
            ClusterError::Exec(ExecError::NotFound(_)) => ExitStatus::CommandNotFound,
            ClusterError::Exec(_) => ExitStatus::CommandNotExecutable,
            _ => ExitStatus::Failure,
        }
    }
}

/// Exit codes reported by the CLI
///
/// | code | meaning |
/// |------|---------|
/// | 0 | full success |
/// | 1 | total failure or fatal provisioning error |
/// | 2 | manifest or configuration invalid |
/// | 3 | partial result |
/// | 4 | port conflict |
/// | 126 | passthrough command could not be executed |
/// | 127 | passthrough command not found |
/// | 130 | aborted by a second interrupt |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    Invalid,
    Partial,
    PortConflict,
    CommandNotExecutable,
    CommandNotFound,
    Aborted,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::Invalid => 2,
            ExitStatus::Partial => 3,
            ExitStatus::PortConflict => 4,
            ExitStatus::CommandNotExecutable => 126,
            ExitStatus::CommandNotFound => 127,
            ExitStatus::Aborted => 130,
        }
    }
}

/// A single problem found while validating a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Where the problem is, e.g. `applications[1].port`
    pub location: String,
    /// What is wrong with it
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Every problem found in a manifest, reported together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    /// A validation error with one issue
    pub fn single(location: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.push(location, message);
        err
    }

    pub fn push(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            location: location.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Ok when no issues were collected
    pub fn into_result(self) -> std::result::Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid manifest ({} problem", self.issues.len())?;
        if self.issues.len() != 1 {
            write!(f, "s")?;
        }
        write!(f, ")")?;
        for issue in &self.issues {
            write!(f, "\n  - {}", issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Failures while driving the container runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// The runtime cannot be reached at all. Fatal for the whole command.
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Failed to {action} node {node}: {message}")]
    Command {
        node: String,
        action: String,
        message: String,
    },

    #[error("Node already exists: {0}")]
    AlreadyExists(String),

    #[error("Work directory {} for {application} does not exist", path.display())]
    MissingWorkdir { application: String, path: PathBuf },

    #[error("Host port {port} for {application} is already in use")]
    PortInUse { application: String, port: u16 },

    #[error("Unexpected runtime output: {0}")]
    Decode(String),

    #[error("Interrupted before {0} was provisioned")]
    Interrupted(String),
}

impl ProvisionError {
    /// Whether this error aborts the whole command rather than one application
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProvisionError::RuntimeUnavailable(_))
    }
}

/// Two applications claim the same host port
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Port conflict: {first} and {second} both publish host port {port}")]
pub struct PortConflictError {
    pub port: u16,
    pub first: String,
    pub second: String,
}

/// Failures of the process passthrough
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Command not found on PATH: {0}")]
    NotFound(String),

    #[error("Invalid argument for {program}: {message}")]
    InvalidArgument { program: String, message: String },

    #[error("Failed to execute {program}: {source}")]
    Replace {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_issue() {
        let mut err = ValidationError::new();
        err.push("applications[0].name", "must not be empty");
        err.push("applications[1].port", "expected an integer, got \"80s\"");

        let text = err.to_string();
        assert!(text.contains("2 problems"));
        assert!(text.contains("applications[0].name"));
        assert!(text.contains("applications[1].port"));
    }

    #[test]
    fn test_exit_codes() {
        let validation: ClusterError = ValidationError::single("x", "y").into();
        assert_eq!(validation.exit_status().code(), 2);

        let conflict: ClusterError = PortConflictError {
            port: 80,
            first: "a".into(),
            second: "b".into(),
        }
        .into();
        assert_eq!(conflict.exit_status().code(), 4);

        let missing: ClusterError = ExecError::NotFound("docker".into()).into();
        assert_eq!(missing.exit_status().code(), 127);

        let fatal: ClusterError = ProvisionError::RuntimeUnavailable("down".into()).into();
        assert_eq!(fatal.exit_status(), ExitStatus::Failure);
    }

    #[test]
    fn test_only_unreachable_runtime_is_fatal() {
        assert!(ProvisionError::RuntimeUnavailable("x".into()).is_fatal());
        assert!(!ProvisionError::Command {
            node: "n".into(),
            action: "create".into(),
            message: "boom".into(),
        }
        .is_fatal());
    }
}
