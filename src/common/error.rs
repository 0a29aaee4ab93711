//! Error types for the test engine
//!
//! Messages are written to be read in a test report: they name the step,
//! target or condition involved and, for timeouts, what was still missing.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine and CLI
#[derive(Error, Debug)]
pub enum Error {
    // === Timeout Errors ===
    #[error("Wait timed out after {checks} checks over {:.2}s at {origin}: {condition}", .elapsed.as_secs_f64())]
    WaitTimeout {
        condition: String,
        origin: String,
        checks: u32,
        elapsed: Duration,
    },

    #[error("Step timed out after {} seconds: {step}", .timeout.as_secs_f64())]
    StepTimeout { step: String, timeout: Duration },

    // === Action Errors ===
    #[error("{action} failed on '{target}': {reason}")]
    ActionFailed {
        action: String,
        target: String,
        reason: String,
    },

    #[error("Target '{target}' has no {capability} widget attached")]
    MissingCapability { target: String, capability: String },

    #[error("Step panicked: {0}")]
    StepPanicked(String),

    // === Case / Run Errors ===
    #[error("Test case '{case}' aborted at step {step}: {message}")]
    CaseAborted {
        case: String,
        step: usize,
        message: String,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("A live {0} already exists; the new one was discarded")]
    DuplicateInstance(&'static str),

    #[error("Cannot {action} while runner is {state}")]
    InvalidState { action: String, state: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid test case '{path}': {message}")]
    CaseFile { path: String, message: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an action failed error
    pub fn action_failed(action: &str, target: &str, reason: impl Into<String>) -> Self {
        Self::ActionFailed {
            action: action.to_string(),
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a missing capability error
    pub fn missing_capability(target: &str, capability: impl std::fmt::Display) -> Self {
        Self::MissingCapability {
            target: target.to_string(),
            capability: capability.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create a case file error
    pub fn case_file(path: impl AsRef<std::path::Path>, message: impl Into<String>) -> Self {
        Self::CaseFile {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// Classify this error into the reporting taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WaitTimeout { .. } | Error::StepTimeout { .. } => ErrorKind::Timeout,
            Error::ActionFailed { .. } | Error::MissingCapability { .. } => {
                ErrorKind::ActionFailure
            }
            Error::CaseAborted { .. } => ErrorKind::CaseAbort,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Config(_)
            | Error::ConfigParse(_)
            | Error::CaseFile { .. }
            | Error::FileRead { .. }
            | Error::Yaml(_) => ErrorKind::Config,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether this error is one of the timeout variants
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

/// Serializable error classification used in step outcomes and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A condition could not be satisfied. Never raised: conditions fold
    /// lookup failures into "not satisfied".
    ConditionUnsatisfiable,
    /// A wait or a whole step exceeded its time budget
    Timeout,
    /// A boundary action failed (missing target, wrong widget, host error)
    ActionFailure,
    /// A case stopped early because of `stop_on_error`
    CaseAbort,
    /// The run was reset while the step was in flight
    Cancelled,
    /// Invalid configuration or case file
    Config,
    /// Anything else
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConditionUnsatisfiable => "condition_unsatisfiable",
            Self::Timeout => "timeout",
            Self::ActionFailure => "action_failure",
            Self::CaseAbort => "case_abort",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}
