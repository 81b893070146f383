/*!
 * App Supervisor Library
 * Ecosystem descriptor loading, process supervision and log routing
 */

pub mod config;
pub mod core;
pub mod logging;
pub mod monitoring;
pub mod process;
pub mod supervisor;

// Re-exports
pub use config::{AppDescriptor, AppSpec, ConfigLoader, EcosystemDescriptor, LogPaths, RestartPolicy};
pub use crate::core::errors::{ConfigError, LaunchError, LogSinkError, SupervisorError};
pub use crate::core::types::{Bytes, InstanceId, Pid, RunId};
pub use logging::{ChildStreams, LogRouter, LogSink, SinkReport};
pub use monitoring::{init_tracing, EventBus, EventKind, SupervisorEvent, TracingOptions};
pub use process::{
    ControllerSettings, ExitEvent, InstanceState, InstanceStatus, ProcessController,
    ProcessHandle, RestartDecision,
};
pub use supervisor::{StartReport, Supervisor};
