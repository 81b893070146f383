/*!
 * Process Spawner
 * Handles OS-level child creation for one instance launch
 */

use crate::config::{AppSpec, LogPaths};
use crate::core::errors::LaunchError;
use crate::core::limits::{APP_NAME_ENV_VAR, INSTANCE_ENV_VAR};
use crate::core::types::Pid;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::info;

/// A freshly spawned child and its OS pid
#[derive(Debug)]
pub struct SpawnedProcess {
    pub child: Child,
    pub os_pid: Pid,
}

/// Build the command for one instance
///
/// The child inherits the supervisor environment, overlaid with the app's
/// merged profile environment and the instance markers. Streams without a
/// destination go to /dev/null so nothing blocks on a full pipe.
pub fn build_command(spec: &AppSpec, index: u32, logs: &LogPaths) -> Command {
    let mut cmd = Command::new(&spec.program);

    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(&spec.env)
        .env(INSTANCE_ENV_VAR, index.to_string())
        .env(APP_NAME_ENV_VAR, &spec.name)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    if logs.out.is_some() || logs.combined.is_some() {
        cmd.stdout(Stdio::piped());
    } else {
        cmd.stdout(Stdio::null());
    }

    if logs.error.is_some() || logs.combined.is_some() {
        cmd.stderr(Stdio::piped());
    } else {
        cmd.stderr(Stdio::null());
    }

    // Own process group so stop signals reach grandchildren (npm -> node)
    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

/// Spawn one instance of `spec`
pub fn spawn(spec: &AppSpec, index: u32, logs: &LogPaths) -> Result<SpawnedProcess, LaunchError> {
    let child = build_command(spec, index, logs)
        .spawn()
        .map_err(|e| LaunchError::SpawnFailed {
            app: spec.name.clone(),
            command: spec.command.clone(),
            reason: e.to_string(),
        })?;

    let os_pid = child
        .id()
        .ok_or_else(|| LaunchError::MissingPid(spec.command.clone()))?;

    info!(
        app = %spec.name,
        index,
        os_pid,
        program = %spec.program.display(),
        "Spawned OS process"
    );

    Ok(SpawnedProcess { child, os_pid })
}
