/*!
 * Process Handle
 * Shared per-instance record; readable by anyone, mutated only by the controller
 */

use super::restart::RestartTracker;
use super::types::{
    ExitEvent, InstanceState, InstanceStatus, ProcessError, ProcessResult, RestartDecision,
};
use crate::config::AppSpec;
use crate::core::types::{Bytes, InstanceId, Pid, RunId};
use crate::monitoring::events::{EventBus, EventKind, SupervisorEvent};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Messages from handles to the instance's supervision task
#[derive(Debug)]
pub(crate) enum InstanceCommand {
    Stop { ack: oneshot::Sender<()> },
    /// End the current run as if it exited with `exit`, then apply the policy
    Tick {
        exit: ExitEvent,
        reply: oneshot::Sender<ProcessResult<RestartDecision>>,
    },
}

/// Mutable runtime facts about the current run
#[derive(Debug, Clone)]
pub(crate) struct InstanceRecord {
    pub run_id: RunId,
    pub os_pid: Option<Pid>,
    pub started_at: Option<OffsetDateTime>,
    pub started: Option<Instant>,
    pub restarts: u32,
    pub last_exit: Option<ExitEvent>,
    pub memory_bytes: Option<Bytes>,
}

impl InstanceRecord {
    fn new() -> Self {
        Self {
            run_id: RunId::new(),
            os_pid: None,
            started_at: None,
            started: None,
            restarts: 0,
            last_exit: None,
            memory_bytes: None,
        }
    }
}

pub(crate) struct InstanceShared {
    pub id: InstanceId,
    pub index: u32,
    pub spec: Arc<AppSpec>,
    pub record: RwLock<InstanceRecord>,
    pub tracker: Mutex<RestartTracker>,
    state: watch::Sender<InstanceState>,
    events: EventBus,
}

impl InstanceShared {
    pub fn new(id: InstanceId, index: u32, spec: Arc<AppSpec>, events: EventBus) -> Self {
        let (state, _) = watch::channel(InstanceState::Stopped);
        Self {
            id,
            index,
            tracker: Mutex::new(RestartTracker::for_spec(&spec)),
            spec,
            record: RwLock::new(InstanceRecord::new()),
            state,
            events,
        }
    }

    #[inline]
    pub fn state(&self) -> InstanceState {
        *self.state.borrow()
    }

    /// Move to `to`, validating the edge and publishing a `StateChanged` event
    pub fn transition(&self, to: InstanceState) -> ProcessResult<()> {
        let mut result = Ok(());
        let mut from = to;
        self.state.send_if_modified(|current| {
            from = *current;
            if current.can_transition_to(to) {
                *current = to;
                true
            } else {
                result = Err(ProcessError::InvalidStateTransition { from: *current, to });
                false
            }
        });
        result?;

        debug!(app = %self.spec.name, index = self.index, ?from, ?to, "Instance state changed");
        self.emit(EventKind::StateChanged { from, to });
        Ok(())
    }

    /// Controller-driven transition; an illegal edge is logged and skipped
    pub fn advance(&self, to: InstanceState) {
        if let Err(e) = self.transition(to) {
            warn!(app = %self.spec.name, index = self.index, error = %e, "Skipped state change");
        }
    }

    pub fn emit(&self, kind: EventKind) {
        let run_id = self.record.read().run_id;
        self.events.emit(SupervisorEvent {
            instance: self.id,
            app: self.spec.name.clone(),
            index: self.index,
            run_id,
            at: OffsetDateTime::now_utc(),
            kind,
        });
    }

    /// Record a fresh launch
    pub fn mark_launched(&self, os_pid: Pid) {
        let mut record = self.record.write();
        record.run_id = RunId::new();
        record.os_pid = Some(os_pid);
        record.started_at = Some(OffsetDateTime::now_utc());
        record.started = Some(Instant::now());
        record.memory_bytes = None;
    }

    pub fn uptime(&self) -> Duration {
        self.record
            .read()
            .started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<InstanceState> {
        self.state.subscribe()
    }
}

/// Handle to one supervised instance
///
/// Cloning is cheap and every clone observes the same instance.
#[derive(Clone)]
pub struct ProcessHandle {
    pub(crate) shared: Arc<InstanceShared>,
    pub(crate) commands: mpsc::UnboundedSender<InstanceCommand>,
}

impl ProcessHandle {
    #[inline]
    pub fn id(&self) -> InstanceId {
        self.shared.id
    }

    pub fn app(&self) -> &str {
        &self.shared.spec.name
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.shared.index
    }

    pub fn spec(&self) -> &Arc<AppSpec> {
        &self.shared.spec
    }

    #[inline]
    pub fn state(&self) -> InstanceState {
        self.shared.state()
    }

    pub fn os_pid(&self) -> Option<Pid> {
        self.shared.record.read().os_pid
    }

    pub fn started_at(&self) -> Option<OffsetDateTime> {
        self.shared.record.read().started_at
    }

    pub fn restarts(&self) -> u32 {
        self.shared.record.read().restarts
    }

    pub fn last_exit(&self) -> Option<ExitEvent> {
        self.shared.record.read().last_exit
    }

    pub fn run_id(&self) -> RunId {
        self.shared.record.read().run_id
    }

    pub fn status(&self) -> InstanceStatus {
        let record = self.shared.record.read().clone();
        InstanceStatus {
            id: self.shared.id,
            app: self.shared.spec.name.clone(),
            index: self.shared.index,
            state: self.shared.state(),
            run_id: record.run_id,
            os_pid: record.os_pid,
            started_at: record.started_at,
            restarts: record.restarts,
            unstable_restarts: self.shared.tracker.lock().unstable_restarts(),
            last_exit: record.last_exit,
            memory_bytes: record.memory_bytes,
        }
    }

    /// Watch state changes
    pub fn watch_state(&self) -> watch::Receiver<InstanceState> {
        self.shared.subscribe_state()
    }

    /// Resolve once the instance reaches `Stopped` or `Errored`
    pub async fn wait_terminal(&self) -> InstanceState {
        self.wait_for(InstanceState::is_terminal).await
    }

    /// Resolve once the state satisfies `predicate`
    pub async fn wait_for(&self, mut predicate: impl FnMut(InstanceState) -> bool) -> InstanceState {
        let mut rx = self.watch_state();
        loop {
            let current = *rx.borrow_and_update();
            if predicate(current) {
                return current;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.shared.id)
            .field("app", &self.shared.spec.name)
            .field("index", &self.shared.index)
            .field("state", &self.state())
            .finish()
    }
}
