/*!
 * Process Controller
 * Starts instances and runs one supervision task per instance
 *
 * The task owns the `Child` and the instance's `LogSink`. Handles only see
 * the shared record and a command channel, so every state change for an
 * instance is made by its own task. `stop` and `restart_policy_tick` are
 * commands sent to that task.
 */

use super::handle::{InstanceCommand, InstanceShared, ProcessHandle};
use super::memory::{MemorySampler, ProcStatusSampler};
use super::signals::{reap_group, terminate};
use super::spawner;
use super::types::{
    ExitEvent, HaltReason, InstanceState, InstanceStatus, ProcessError, ProcessResult,
    RestartDecision,
};
use crate::config::AppSpec;
use crate::core::errors::LaunchError;
use crate::core::limits::{
    DEFAULT_LOG_DRAIN_TIMEOUT, DEFAULT_MEMORY_SAMPLE_INTERVAL, MAX_MEMORY_SAMPLE_INTERVAL,
};
use crate::core::types::{format_bytes, Bytes, InstanceId};
use crate::logging::{ChildStreams, LogRouter, LogSink};
use crate::monitoring::events::{EventBus, EventKind};
use crate::monitoring::{instance_span, record_run_id};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

/// Controller-wide timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Resident memory sampling period for apps with `max_memory`
    pub memory_interval: Duration,
    /// How long a finished run's log readers may keep draining
    pub log_drain_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            memory_interval: DEFAULT_MEMORY_SAMPLE_INTERVAL,
            log_drain_timeout: DEFAULT_LOG_DRAIN_TIMEOUT,
        }
    }
}

/// Builder for ProcessController
pub struct ProcessControllerBuilder {
    settings: ControllerSettings,
    sampler: Option<Arc<dyn MemorySampler>>,
    events: Option<EventBus>,
    router: Option<LogRouter>,
}

impl ProcessControllerBuilder {
    pub fn new() -> Self {
        Self {
            settings: ControllerSettings::default(),
            sampler: None,
            events: None,
            router: None,
        }
    }

    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Memory sampling period (clamped to between 1ms and one day)
    pub fn with_memory_interval(mut self, interval: Duration) -> Self {
        self.settings.memory_interval = interval;
        self
    }

    pub fn with_log_drain_timeout(mut self, timeout: Duration) -> Self {
        self.settings.log_drain_timeout = timeout;
        self
    }

    /// Replace the `/proc` memory sampler
    pub fn with_sampler(mut self, sampler: impl MemorySampler) -> Self {
        self.sampler = Some(Arc::new(sampler));
        self
    }

    /// Publish on an existing event bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_router(mut self, router: LogRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn build(self) -> ProcessController {
        let mut settings = self.settings;
        settings.memory_interval = settings
            .memory_interval
            .clamp(Duration::from_millis(1), MAX_MEMORY_SAMPLE_INTERVAL);

        info!(
            memory_interval_ms = settings.memory_interval.as_millis() as u64,
            custom_sampler = self.sampler.is_some(),
            "Process controller initialized"
        );

        ProcessController {
            instances: DashMap::new(),
            next_id: AtomicU32::new(1),
            next_index: DashMap::new(),
            events: self.events.unwrap_or_default(),
            ctx: TaskContext {
                router: self.router.unwrap_or_default(),
                sampler: self
                    .sampler
                    .unwrap_or_else(|| Arc::new(ProcStatusSampler::new())),
                settings,
            },
        }
    }
}

impl Default for ProcessControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// What a supervision task needs besides its instance
#[derive(Clone)]
struct TaskContext {
    router: LogRouter,
    sampler: Arc<dyn MemorySampler>,
    settings: ControllerSettings,
}

/// Owns every supervised instance
pub struct ProcessController {
    instances: DashMap<InstanceId, ProcessHandle>,
    next_id: AtomicU32,
    next_index: DashMap<String, u32>,
    events: EventBus,
    ctx: TaskContext,
}

impl ProcessController {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ProcessControllerBuilder {
        ProcessControllerBuilder::new()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> ControllerSettings {
        self.ctx.settings
    }

    /// Launch the next instance of `spec`
    ///
    /// On failure the instance is never registered and the error is
    /// returned as-is.
    pub async fn start(&self, spec: Arc<AppSpec>) -> Result<ProcessHandle, LaunchError> {
        let index = {
            let mut next = self.next_index.entry(spec.name.clone()).or_insert(0);
            let index = *next;
            *next += 1;
            index
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let shared = Arc::new(InstanceShared::new(id, index, spec, self.events.clone()));
        shared.advance(InstanceState::Starting);

        let (child, sink) = match launch(&shared, &self.ctx).await {
            Ok(launched) => launched,
            Err(e) => {
                error!(app = %shared.spec.name, index, error = %e, "Launch failed");
                shared.emit(EventKind::LaunchFailed { error: e.clone() });
                shared.advance(InstanceState::Errored);
                return Err(e);
            }
        };
        shared.advance(InstanceState::Running);

        let (commands, rx) = mpsc::unbounded_channel();
        let handle = ProcessHandle {
            shared: Arc::clone(&shared),
            commands,
        };
        self.instances.insert(id, handle.clone());

        let span = instance_span(&shared.spec.name, index, id, handle.run_id());
        tokio::spawn(supervise(shared, child, sink, rx, self.ctx.clone()).instrument(span));

        info!(app = %handle.app(), index, id, os_pid = ?handle.os_pid(), "Instance started");
        Ok(handle)
    }

    /// Stop an instance and wait until it is `Stopped`
    ///
    /// A no-op for instances already `Stopped` or `Errored`.
    pub async fn stop(&self, handle: &ProcessHandle) -> ProcessResult<()> {
        if handle.state().is_terminal() {
            return Ok(());
        }

        let (ack, done) = oneshot::channel();
        let delivered = handle.commands.send(InstanceCommand::Stop { ack }).is_ok();
        if delivered && done.await.is_ok() {
            return Ok(());
        }

        // The task ended before acknowledging; fine if it ended terminally
        if handle.state().is_terminal() {
            Ok(())
        } else {
            Err(ProcessError::TaskGone(handle.id()))
        }
    }

    /// End the current run as if it exited with `exit` and apply the policy
    ///
    /// The instance's task terminates the live child, moves `Running` to
    /// `Exited`/`Crashed`, then to `Restarting` (and relaunches after the
    /// backoff) or the halt state. Only a `Running` instance accepts a tick;
    /// anything else is an `InvalidStateTransition`.
    pub async fn restart_policy_tick(
        &self,
        handle: &ProcessHandle,
        exit: ExitEvent,
    ) -> ProcessResult<RestartDecision> {
        let state = handle.state();
        if state.is_terminal() {
            return Err(ProcessError::InvalidStateTransition {
                from: state,
                to: exit.state(),
            });
        }

        let (reply, result) = oneshot::channel();
        handle
            .commands
            .send(InstanceCommand::Tick { exit, reply })
            .map_err(|_| ProcessError::TaskGone(handle.id()))?;
        result
            .await
            .unwrap_or(Err(ProcessError::TaskGone(handle.id())))
    }

    pub fn get(&self, id: InstanceId) -> Option<ProcessHandle> {
        self.instances.get(&id).map(|entry| entry.value().clone())
    }

    /// All instances ever started, ordered by id
    ///
    /// Stopped and errored instances stay listed so their final status
    /// remains readable.
    pub fn handles(&self) -> Vec<ProcessHandle> {
        let mut handles: Vec<_> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        handles.sort_by_key(ProcessHandle::id);
        handles
    }

    pub fn status(&self) -> Vec<InstanceStatus> {
        self.handles().iter().map(ProcessHandle::status).collect()
    }

    /// Stop every instance concurrently
    pub async fn stop_all(&self) {
        let handles = self.handles();
        let results = futures::future::join_all(handles.iter().map(|h| self.stop(h))).await;
        for (handle, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                warn!(app = %handle.app(), index = handle.index(), error = %e, "Stop failed");
            }
        }
    }
}

impl Default for ProcessController {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the child and attach its log sink
async fn launch(shared: &InstanceShared, ctx: &TaskContext) -> Result<(Child, LogSink), LaunchError> {
    let logs = shared.spec.log_paths_for(shared.index);
    let mut spawned = spawner::spawn(&shared.spec, shared.index, &logs)?;

    let streams = ChildStreams::from_child(&mut spawned.child);
    let sink = ctx.router.attach(streams, &shared.spec, shared.index).await;

    shared.mark_launched(spawned.os_pid);
    for error in sink.degraded() {
        shared.emit(EventKind::LogSinkDegraded {
            error: error.clone(),
        });
    }

    Ok((spawned.child, sink))
}

fn apply_exit(shared: &InstanceShared, exit: ExitEvent) -> ProcessResult<RestartDecision> {
    shared.transition(exit.state())?;
    shared.record.write().last_exit = Some(exit);
    shared.emit(EventKind::Exited { exit });

    let decision = shared.tracker.lock().on_exit(&exit);
    match decision {
        RestartDecision::Restart { attempt, delay } => {
            shared.transition(InstanceState::Restarting)?;
            shared.record.write().restarts += 1;
            shared.emit(EventKind::RestartScheduled {
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            info!(
                code = ?exit.code,
                signal = ?exit.signal,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Restart scheduled"
            );
        }
        RestartDecision::Halt { state, reason } => {
            if let HaltReason::RestartsExhausted { unstable_restarts } = reason {
                error!(unstable_restarts, "Too many unstable restarts, giving up");
                shared.emit(EventKind::RestartsExhausted { unstable_restarts });
            } else {
                info!(?reason, code = ?exit.code, "Instance will not be restarted");
            }
            shared.transition(state)?;
        }
    }

    Ok(decision)
}

enum RunOutcome {
    Exited(ExitEvent),
    MemoryExceeded {
        resident: Bytes,
        limit: Bytes,
    },
    Stop(Option<oneshot::Sender<()>>),
    Tick {
        exit: ExitEvent,
        reply: oneshot::Sender<ProcessResult<RestartDecision>>,
    },
}

/// Per-instance supervision loop
async fn supervise(
    shared: Arc<InstanceShared>,
    mut child: Child,
    mut sink: LogSink,
    mut commands: mpsc::UnboundedReceiver<InstanceCommand>,
    ctx: TaskContext,
) {
    loop {
        match watch_run(&shared, &mut child, &mut commands, &ctx).await {
            RunOutcome::Exited(exit) => {
                reap_leftovers(&shared).await;
                drain(&shared, sink, &ctx).await;

                let decision = apply_exit(&shared, exit);
                if !wait_backoff(&shared, decision, &mut commands).await {
                    return;
                }
            }
            RunOutcome::Tick { exit, reply } => {
                info!(code = ?exit.code, signal = ?exit.signal, "Ending run for restart policy tick");
                stop_child(&shared, &mut child).await;
                drain(&shared, sink, &ctx).await;

                let decision = apply_exit(&shared, exit);
                let _ = reply.send(decision.clone());
                if !wait_backoff(&shared, decision, &mut commands).await {
                    return;
                }
            }
            RunOutcome::MemoryExceeded { resident, limit } => {
                warn!(
                    resident = %format_bytes(resident),
                    limit = %format_bytes(limit),
                    "Memory ceiling exceeded, restarting"
                );
                shared.advance(InstanceState::Restarting);
                shared.emit(EventKind::MemoryExceeded { resident, limit });

                let exit = stop_child(&shared, &mut child).await;
                {
                    let mut record = shared.record.write();
                    record.last_exit = Some(exit);
                    record.restarts += 1;
                }
                drain(&shared, sink, &ctx).await;
            }
            RunOutcome::Stop(ack) => {
                shared.advance(InstanceState::Stopping);
                let exit = stop_child(&shared, &mut child).await;
                shared.record.write().last_exit = Some(exit);
                drain(&shared, sink, &ctx).await;
                shared.advance(InstanceState::Stopped);
                info!("Instance stopped");
                acknowledge(ack);
                return;
            }
        }

        shared.advance(InstanceState::Starting);
        match launch(&shared, &ctx).await {
            Ok((next_child, next_sink)) => {
                child = next_child;
                sink = next_sink;
                record_run_id(shared.record.read().run_id);
                shared.advance(InstanceState::Running);
                info!(os_pid = ?shared.record.read().os_pid, "Instance relaunched");
            }
            Err(e) => {
                error!(error = %e, "Relaunch failed");
                shared.emit(EventKind::LaunchFailed { error: e });
                shared.advance(InstanceState::Errored);
                return;
            }
        }
    }
}

/// Sleep out the restart delay of `decision`
///
/// Returns false when supervision should end: the policy halted, or a stop
/// arrived during the backoff. Ticks are rejected while no child is running.
async fn wait_backoff(
    shared: &InstanceShared,
    decision: ProcessResult<RestartDecision>,
    commands: &mut mpsc::UnboundedReceiver<InstanceCommand>,
) -> bool {
    let delay = match decision {
        Ok(RestartDecision::Restart { delay, .. }) => delay,
        Ok(RestartDecision::Halt { .. }) => return false,
        Err(e) => {
            error!(error = %e, "Cannot apply restart policy");
            return false;
        }
    };

    let backoff = tokio::time::sleep(delay);
    tokio::pin!(backoff);
    loop {
        tokio::select! {
            _ = &mut backoff => return true,
            cmd = commands.recv() => match cmd {
                Some(InstanceCommand::Tick { exit, reply }) => {
                    let _ = reply.send(Err(ProcessError::InvalidStateTransition {
                        from: shared.state(),
                        to: exit.state(),
                    }));
                }
                Some(InstanceCommand::Stop { ack }) => {
                    shared.advance(InstanceState::Stopping);
                    shared.advance(InstanceState::Stopped);
                    acknowledge(Some(ack));
                    return false;
                }
                None => {
                    shared.advance(InstanceState::Stopping);
                    shared.advance(InstanceState::Stopped);
                    return false;
                }
            }
        }
    }
}

/// Wait for the current run to end, a memory breach, or a command
async fn watch_run(
    shared: &InstanceShared,
    child: &mut Child,
    commands: &mut mpsc::UnboundedReceiver<InstanceCommand>,
    ctx: &TaskContext,
) -> RunOutcome {
    let limit = shared.spec.max_memory;
    let period = ctx.settings.memory_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            status = child.wait() => {
                let uptime = shared.uptime();
                let exit = match status {
                    Ok(status) => ExitEvent::from_status(status, uptime),
                    Err(e) => {
                        warn!(error = %e, "Waiting on child failed");
                        ExitEvent { code: None, signal: None, uptime }
                    }
                };
                debug!(code = ?exit.code, signal = ?exit.signal, uptime_ms = uptime.as_millis() as u64, "Child exited");
                return RunOutcome::Exited(exit);
            }
            _ = ticker.tick(), if limit.is_some() => {
                let (Some(limit), Some(resident)) = (limit, sample(shared, ctx).await) else {
                    continue;
                };
                if resident > limit {
                    return RunOutcome::MemoryExceeded { resident, limit };
                }
            }
            cmd = commands.recv() => {
                return match cmd {
                    Some(InstanceCommand::Stop { ack }) => RunOutcome::Stop(Some(ack)),
                    Some(InstanceCommand::Tick { exit, reply }) => RunOutcome::Tick { exit, reply },
                    None => RunOutcome::Stop(None),
                };
            }
        }
    }
}

async fn sample(shared: &InstanceShared, ctx: &TaskContext) -> Option<Bytes> {
    let pid = shared.record.read().os_pid?;
    let sampler = Arc::clone(&ctx.sampler);
    let resident = tokio::task::spawn_blocking(move || sampler.resident_bytes(pid))
        .await
        .ok()
        .flatten()?;

    shared.record.write().memory_bytes = Some(resident);
    Some(resident)
}

async fn stop_child(shared: &InstanceShared, child: &mut Child) -> ExitEvent {
    match terminate(child, shared.spec.kill_timeout).await {
        Ok(status) => ExitEvent::from_status(status, shared.uptime()),
        Err(e) => {
            warn!(error = %e, "Terminating child failed");
            ExitEvent {
                code: None,
                signal: None,
                uptime: shared.uptime(),
            }
        }
    }
}

/// Signal group members left behind by a leader that exited on its own
async fn reap_leftovers(shared: &InstanceShared) {
    let os_pid = shared.record.read().os_pid;
    if let Some(os_pid) = os_pid {
        if reap_group(os_pid, shared.spec.kill_timeout).await {
            info!(os_pid, "Terminated processes left in the exited run's group");
        }
    }
}

async fn drain(shared: &InstanceShared, sink: LogSink, ctx: &TaskContext) {
    let report = sink.finish(ctx.settings.log_drain_timeout).await;
    for destination in &report.destinations {
        if let Some(error) = &destination.error {
            shared.emit(EventKind::LogSinkDegraded {
                error: error.clone(),
            });
        }
    }
    debug!(destinations = report.destinations.len(), "Log sink drained");
}

fn acknowledge(ack: Option<oneshot::Sender<()>>) {
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}
