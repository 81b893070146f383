/*!
 * Monitoring
 * Status events and tracing setup
 */

pub mod events;
mod tracer;

pub use events::{EventBus, EventKind, SupervisorEvent};
pub use tracer::{init_tracing, instance_span, record_run_id, OperationSpan, TracingOptions, TRACE_JSON_ENV};
