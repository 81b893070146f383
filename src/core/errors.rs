/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::process::types::ProcessError;

/// Descriptor loading and validation errors
///
/// Every validation variant names the app and the offending field so the
/// operator can fix the descriptor without guessing.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("Cannot read descriptor {path}: {reason}")]
    #[diagnostic(
        code(config::read_failed),
        help("Check that the descriptor file exists and is readable.")
    )]
    Read { path: String, reason: String },

    #[error("Malformed descriptor: {0}")]
    #[diagnostic(
        code(config::parse_failed),
        help("The descriptor must be JSON: an object with an `apps` array, an array of apps, or a single app.")
    )]
    Parse(String),

    #[error("Descriptor declares no apps")]
    #[diagnostic(code(config::no_apps), help("Add at least one entry to `apps`."))]
    NoApps,

    #[error("App `{app}`: missing required field `{field}`")]
    #[diagnostic(
        code(config::missing_field),
        help("Required fields are `name`, `script` (or `command`) and `cwd`.")
    )]
    MissingField { app: String, field: String },

    #[error("App `{app}`: invalid `{field}`: {reason}")]
    #[diagnostic(code(config::invalid_field))]
    InvalidField {
        app: String,
        field: String,
        reason: String,
    },

    #[error("App `{app}`: unknown field `{field}`")]
    #[diagnostic(
        code(config::unknown_field),
        help("Profile sections must be named `env_<profile>`. Remove or rename the field.")
    )]
    UnknownField { app: String, field: String },

    #[error("Duplicate app name `{0}`")]
    #[diagnostic(code(config::duplicate_name), help("App names must be unique."))]
    DuplicateName(String),
}

impl ConfigError {
    pub(crate) fn missing(app: &str, field: &str) -> Self {
        ConfigError::MissingField {
            app: app.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid(app: &str, field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            app: app.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the offending field, when the error is tied to one
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::MissingField { field, .. }
            | ConfigError::InvalidField { field, .. }
            | ConfigError::UnknownField { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Child process launch errors (instance-fatal)
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum LaunchError {
    #[error("Failed to spawn `{command}` for {app}: {reason}")]
    #[diagnostic(
        code(launch::spawn_failed),
        help("Check that the binary exists, is executable, and that cwd is accessible.")
    )]
    SpawnFailed {
        app: String,
        command: String,
        reason: String,
    },

    #[error("Spawned `{0}` but the OS reported no pid")]
    #[diagnostic(code(launch::no_pid))]
    MissingPid(String),
}

/// Log destination errors (degraded, never fatal)
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum LogSinkError {
    #[error("Cannot open log destination {path}: {reason}")]
    #[diagnostic(
        code(log_sink::open_failed),
        help("Output for this destination is discarded. Check directory permissions.")
    )]
    Open { path: String, reason: String },

    #[error("Write to {path} failed: {reason}")]
    #[diagnostic(code(log_sink::write_failed))]
    Write { path: String, reason: String },
}

/// Unified supervisor error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("Launch error: {0}")]
    #[diagnostic(transparent)]
    Launch(#[from] LaunchError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Log sink error: {0}")]
    #[diagnostic(transparent)]
    LogSink(#[from] LogSinkError),

    #[error("I/O error: {0}")]
    #[diagnostic(
        code(supervisor::io_error),
        help("Filesystem or I/O operation failed. Check file permissions and disk space.")
    )]
    Io(String),

    #[error("Internal error: {0}")]
    #[diagnostic(
        code(supervisor::internal_error),
        help("An unexpected internal error occurred. Please report this issue.")
    )]
    Internal(String),
}

impl From<std::io::Error> for SupervisorError {
    fn from(err: std::io::Error) -> Self {
        SupervisorError::Io(err.to_string())
    }
}

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;
