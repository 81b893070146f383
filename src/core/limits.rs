/*!
 * Supervisor Limits and Defaults
 *
 * Centralized location for restart, timing and logging defaults.
 * Descriptor fields override the per-app values; the sampling and
 * channel sizes are controller-wide.
 */

use std::time::Duration;

// =============================================================================
// RESTART POLICY
// =============================================================================

/// Unstable restarts allowed before an instance is marked errored
pub const DEFAULT_MAX_RESTARTS: u32 = 15;

/// A run shorter than this counts as unstable
pub const DEFAULT_MIN_UPTIME: Duration = Duration::from_millis(1000);

/// First backoff delay after a crash
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Backoff growth factor per consecutive unstable restart
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Upper bound on any computed backoff delay
pub const BACKOFF_CEILING: Duration = Duration::from_secs(15);

// =============================================================================
// PROCESS CONTROL
// =============================================================================

/// Grace period between SIGTERM and SIGKILL
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_millis(1600);

/// Resident memory sampling period
pub const DEFAULT_MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

/// Longest accepted memory sampling period (one day)
pub const MAX_MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Poll period while waiting for an orphaned process group to exit
pub const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Capacity of the status event channel; slow subscribers see `Lagged`
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of each per-destination log line channel
pub const LOG_CHANNEL_CAPACITY: usize = 4096;

/// Env var carrying the instance index into the child
pub const INSTANCE_ENV_VAR: &str = "NODE_APP_INSTANCE";

/// Env var carrying the app name into the child
pub const APP_NAME_ENV_VAR: &str = "SUPERVISOR_APP_NAME";

/// How long a stopped run's log readers may keep draining
pub const DEFAULT_LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
