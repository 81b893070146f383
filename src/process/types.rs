/*!
 * Process Types
 * Instance states, exit events and restart decisions
 */

use crate::core::types::{Bytes, InstanceId, Pid, RunId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

/// Process operation result
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Controller errors (launch failures use `LaunchError`)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: InstanceState,
        to: InstanceState,
    },

    #[error("Supervision task for instance {0} is gone")]
    TaskGone(InstanceId),
}

/// Instance lifecycle state
///
/// ```text
/// Stopped -> Starting -> Running -> Exited | Crashed -> Restarting -> Starting
///                           |                        -> Stopped | Errored
///                           +-> Restarting (memory ceiling)
///                           +-> Stopping -> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Not running and not going to run
    Stopped,
    /// Spawn in progress
    Starting,
    /// Child process alive
    Running,
    /// Child exited with code 0
    Exited,
    /// Child exited non-zero or was killed by a signal
    Crashed,
    /// Waiting out the backoff or killing for a memory restart
    Restarting,
    /// Explicit stop in progress
    Stopping,
    /// Restart budget exhausted or relaunch failed
    Errored,
}

impl InstanceState {
    /// Whether the lifecycle allows moving from `self` to `to`
    #[must_use]
    pub const fn can_transition_to(self, to: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Errored)
                | (Running, Exited)
                | (Running, Crashed)
                | (Running, Restarting)
                | (Running, Stopping)
                | (Exited, Restarting)
                | (Exited, Stopped)
                | (Exited, Errored)
                | (Crashed, Restarting)
                | (Crashed, Stopped)
                | (Crashed, Errored)
                | (Restarting, Starting)
                | (Restarting, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// No further transitions will happen on their own
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Errored)
    }

    #[inline]
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, InstanceState::Running)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExitEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(with = "millis")]
    pub uptime: Duration,
}

impl ExitEvent {
    pub fn with_code(code: i32, uptime: Duration) -> Self {
        Self {
            code: Some(code),
            signal: None,
            uptime,
        }
    }

    pub fn with_signal(signal: i32, uptime: Duration) -> Self {
        Self {
            code: None,
            signal: Some(signal),
            uptime,
        }
    }

    pub fn from_status(status: std::process::ExitStatus, uptime: Duration) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            uptime,
        }
    }

    /// Exit code 0, no signal
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }

    /// State recorded for this exit
    #[must_use]
    pub fn state(&self) -> InstanceState {
        if self.is_clean() {
            InstanceState::Exited
        } else {
            InstanceState::Crashed
        }
    }
}

/// Why an instance will not be restarted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HaltReason {
    AutorestartDisabled,
    StopExitCode { code: i32 },
    RestartsExhausted { unstable_restarts: u32 },
}

/// Outcome of the restart policy for one exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { attempt: u32, delay: Duration },
    Halt { state: InstanceState, reason: HaltReason },
}

impl RestartDecision {
    #[inline]
    #[must_use]
    pub const fn is_restart(&self) -> bool {
        matches!(self, RestartDecision::Restart { .. })
    }
}

/// Point-in-time view of one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InstanceStatus {
    pub id: InstanceId,
    pub app: String,
    pub index: u32,
    pub state: InstanceState,
    pub run_id: RunId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_pid: Option<Pid>,
    #[serde(with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none", default)]
    pub started_at: Option<OffsetDateTime>,
    pub restarts: u32,
    pub unstable_restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<ExitEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<Bytes>,
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
