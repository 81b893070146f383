/*!
 * Status Events
 * Broadcast channel carrying per-instance lifecycle and failure reports
 */

use crate::core::errors::{LaunchError, LogSinkError};
use crate::core::limits::EVENT_CHANNEL_CAPACITY;
use crate::core::types::{Bytes, InstanceId, RunId};
use crate::process::types::{ExitEvent, InstanceState};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    StateChanged {
        from: InstanceState,
        to: InstanceState,
    },
    Exited {
        exit: ExitEvent,
    },
    LaunchFailed {
        error: LaunchError,
    },
    RestartScheduled {
        attempt: u32,
        delay_ms: u64,
    },
    MemoryExceeded {
        resident: Bytes,
        limit: Bytes,
    },
    LogSinkDegraded {
        error: LogSinkError,
    },
    RestartsExhausted {
        unstable_restarts: u32,
    },
}

/// One status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorEvent {
    pub instance: InstanceId,
    pub app: String,
    pub index: u32,
    pub run_id: RunId,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Fan-out of supervisor events. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: SupervisorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
