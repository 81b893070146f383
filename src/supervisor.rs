/*!
 * Supervisor
 * Starts every configured app and shuts them all down together
 */

use crate::config::AppSpec;
use crate::core::errors::LaunchError;
use crate::monitoring::{EventBus, OperationSpan};
use crate::process::{
    ControllerSettings, InstanceState, InstanceStatus, ProcessController, ProcessHandle,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// A launch that failed during [`Supervisor::start_all`]
#[derive(Debug, Clone, Serialize)]
pub struct FailedLaunch {
    pub app: String,
    pub error: LaunchError,
}

/// Outcome of starting every configured instance
#[derive(Debug, Default)]
pub struct StartReport {
    pub started: Vec<ProcessHandle>,
    pub failed: Vec<FailedLaunch>,
}

impl StartReport {
    pub fn all_started(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Loaded specs plus the controller running them
pub struct Supervisor {
    apps: Vec<Arc<AppSpec>>,
    controller: ProcessController,
}

impl Supervisor {
    pub fn new(apps: Vec<AppSpec>, settings: ControllerSettings) -> Self {
        let controller = ProcessController::builder().with_settings(settings).build();
        Self::with_controller(apps, controller)
    }

    pub fn with_controller(apps: Vec<AppSpec>, controller: ProcessController) -> Self {
        Self {
            apps: apps.into_iter().map(Arc::new).collect(),
            controller,
        }
    }

    pub fn apps(&self) -> &[Arc<AppSpec>] {
        &self.apps
    }

    pub fn controller(&self) -> &ProcessController {
        &self.controller
    }

    pub fn events(&self) -> &EventBus {
        self.controller.events()
    }

    /// Launch `instances` copies of every app
    ///
    /// A launch failure is recorded and the remaining instances still start.
    pub async fn start_all(&self) -> StartReport {
        let _op = OperationSpan::new("start_all");
        let mut report = StartReport::default();

        for spec in &self.apps {
            for _ in 0..spec.instances {
                match self.controller.start(Arc::clone(spec)).await {
                    Ok(handle) => report.started.push(handle),
                    Err(error) => {
                        error!(app = %spec.name, error = %error, "Instance failed to start");
                        report.failed.push(FailedLaunch {
                            app: spec.name.clone(),
                            error,
                        });
                    }
                }
            }
        }

        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "Applications started"
        );
        report
    }

    pub fn status(&self) -> Vec<InstanceStatus> {
        self.controller.status()
    }

    /// Resolve once every started instance is `Stopped` or `Errored`
    pub async fn wait_all_terminal(&self) -> Vec<InstanceState> {
        let handles = self.controller.handles();
        futures::future::join_all(handles.iter().map(|h| h.wait_terminal())).await
    }

    /// Stop every instance and wait for them
    pub async fn shutdown(&self) {
        let _op = OperationSpan::new("shutdown");
        info!(instances = self.controller.handles().len(), "Shutting down");
        self.controller.stop_all().await;
    }
}
