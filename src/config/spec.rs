/*!
 * Application Spec
 * Validated, immutable description of one supervised app
 */

use crate::core::limits::{
    BACKOFF_CEILING, BACKOFF_MULTIPLIER, DEFAULT_BACKOFF_BASE, DEFAULT_KILL_TIMEOUT,
    DEFAULT_MAX_RESTARTS, DEFAULT_MIN_UPTIME,
};
use crate::core::types::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Validated app descriptor. Only the config loader builds these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppSpec {
    pub name: String,
    /// Command as written in the descriptor
    pub command: String,
    /// Resolved executable
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub instances: u32,
    pub autorestart: bool,
    pub watch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Merged environment for the active profile
    pub env: BTreeMap<String, String>,
    pub logs: LogPaths,
    pub time: bool,
    pub restart: RestartPolicy,
    #[serde(with = "duration_ms")]
    pub kill_timeout: Duration,
}

impl AppSpec {
    /// Spec with defaults for everything but the essentials
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            name: name.into(),
            command: program.display().to_string(),
            program,
            args: Vec::new(),
            cwd: cwd.into(),
            instances: 1,
            autorestart: true,
            watch: false,
            max_memory: None,
            profile: None,
            env: BTreeMap::new(),
            logs: LogPaths::default(),
            time: false,
            restart: RestartPolicy::default(),
            kill_timeout: DEFAULT_KILL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_autorestart(mut self, autorestart: bool) -> Self {
        self.autorestart = autorestart;
        self
    }

    #[must_use]
    pub fn with_max_memory(mut self, bytes: Bytes) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_logs(mut self, logs: LogPaths) -> Self {
        self.logs = logs;
        self
    }

    #[must_use]
    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Log destinations for one instance of this app
    pub fn log_paths_for(&self, index: u32) -> LogPaths {
        self.logs.for_instance(index, self.instances)
    }
}

/// Log destinations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogPaths {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined: Option<PathBuf>,
    /// All instances share the same files
    pub merge: bool,
}

impl LogPaths {
    /// Per-instance paths: `out.log` becomes `out-2.log` for instance 2
    /// when several instances run without `merge`.
    pub fn for_instance(&self, index: u32, instances: u32) -> LogPaths {
        if self.merge || instances <= 1 {
            return self.clone();
        }
        let suffix = |path: &Option<PathBuf>| path.as_deref().map(|p| suffixed(p, index));
        LogPaths {
            out: suffix(&self.out),
            error: suffix(&self.error),
            combined: suffix(&self.combined),
            merge: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_none() && self.error.is_none() && self.combined.is_none()
    }
}

fn suffixed(path: &Path, index: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}-{}", stem, index),
    };
    path.with_file_name(name)
}

/// Restart rules for one app
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestartPolicy {
    /// Unstable restarts tolerated before the instance is marked errored
    pub max_restarts: u32,
    /// Runs at least this long reset the unstable counter
    #[serde(with = "duration_ms")]
    pub min_uptime: Duration,
    pub backoff: Backoff,
    /// Exit codes that are never restarted
    pub stop_exit_codes: Vec<i32>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            min_uptime: DEFAULT_MIN_UPTIME,
            backoff: Backoff::default(),
            stop_exit_codes: Vec::new(),
        }
    }
}

/// Delay applied before a restart
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay every time
    Fixed {
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    /// `base * 1.5^(attempt-1)`, capped at 15s
    Exponential {
        #[serde(with = "duration_ms")]
        base: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl Backoff {
    /// Delay for a 1-based attempt number
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential { base } => {
                let exponent = attempt.saturating_sub(1).min(64) as i32;
                let nanos = base.as_nanos() as f64 * BACKOFF_MULTIPLIER.powi(exponent);
                if !nanos.is_finite() || nanos >= BACKOFF_CEILING.as_nanos() as f64 {
                    BACKOFF_CEILING
                } else {
                    Duration::from_nanos(nanos.round() as u64)
                }
            }
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
