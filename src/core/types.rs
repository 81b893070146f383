/*!
 * Core Types
 * Common types used across the supervisor
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// OS process id
pub type Pid = u32;

/// Supervisor-assigned instance id (stable across restarts)
pub type InstanceId = u32;

/// Byte count for memory thresholds and samples
pub type Bytes = u64;

/// Identifies one launch of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(uuid::Uuid);

impl RunId {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render a byte count the way descriptors write it ("1G", "512M")
pub fn format_bytes(bytes: Bytes) -> String {
    const UNITS: [(Bytes, &str); 3] = [(1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];
    for (size, suffix) in UNITS {
        if bytes >= size && bytes % size == 0 {
            return format!("{}{}", bytes / size, suffix);
        }
    }
    format!("{}B", bytes)
}
