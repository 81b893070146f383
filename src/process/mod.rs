/*!
 * Process Module
 * OS process lifecycle: spawn, supervise, restart, stop
 */

pub mod controller;
pub mod handle;
pub mod memory;
pub mod restart;
pub mod signals;
pub mod spawner;
pub mod types;

// Re-export for convenience
pub use controller::{ControllerSettings, ProcessController, ProcessControllerBuilder};
pub use handle::ProcessHandle;
pub use memory::{MemorySampler, ProcStatusSampler};
pub use restart::RestartTracker;
pub use types::{
    ExitEvent, HaltReason, InstanceState, InstanceStatus, ProcessError, ProcessResult,
    RestartDecision,
};
