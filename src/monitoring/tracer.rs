/*!
 * Tracing
 * Subscriber setup and spans for supervised instances
 */

use crate::core::types::{InstanceId, RunId};
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Env var that switches output to JSON when set to `1` or `true`
pub const TRACE_JSON_ENV: &str = "SUPERVISOR_TRACE_JSON";

/// Subscriber options, usually from the command line
#[derive(Debug, Clone, Default)]
pub struct TracingOptions {
    /// Filter directive; `RUST_LOG` wins when set
    pub filter: Option<String>,
    /// Force JSON output
    pub json: bool,
}

/// Initialize the global subscriber
///
/// Environment variables:
/// - RUST_LOG: filter directives (default: info)
/// - SUPERVISOR_TRACE_JSON: JSON output (default: false)
pub fn init_tracing(options: &TracingOptions) {
    let fallback = options.filter.as_deref().unwrap_or("info");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let use_json = options.json
        || std::env::var(TRACE_JSON_ENV)
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .init();
        info!("Structured tracing initialized with JSON output");
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_span_events(FmtSpan::NONE)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
        debug!("Structured tracing initialized");
    }
}

/// Span wrapping everything one instance's supervision task logs
pub fn instance_span(app: &str, index: u32, id: InstanceId, run_id: RunId) -> Span {
    span!(Level::INFO, "instance", app = %app, index, id, run_id = %run_id)
}

/// Point the current instance span at a new launch
pub fn record_run_id(run_id: RunId) {
    Span::current().record("run_id", tracing::field::display(run_id));
}

/// Times a supervisor-wide operation and logs its duration when dropped
pub struct OperationSpan {
    span: Span,
    start: Instant,
    operation: &'static str,
    slow_after: Duration,
}

impl OperationSpan {
    pub fn new(operation: &'static str) -> Self {
        Self::with_threshold(operation, Duration::from_secs(5))
    }

    /// Warn instead of debug-log when the operation takes longer than `slow_after`
    pub fn with_threshold(operation: &'static str, slow_after: Duration) -> Self {
        let span = span!(Level::DEBUG, "operation", operation, duration_ms = tracing::field::Empty);
        Self {
            span,
            start: Instant::now(),
            operation,
            slow_after,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let duration_ms = duration.as_millis() as u64;
        self.span.record("duration_ms", duration_ms);
        let _entered = self.span.enter();

        if duration > self.slow_after {
            warn!(operation = self.operation, duration_ms, slow = true, "Slow operation");
        } else {
            debug!(operation = self.operation, duration_ms, "Operation completed");
        }
    }
}
