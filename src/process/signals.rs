/*!
 * Process Termination
 * SIGTERM, bounded grace period, then SIGKILL
 */

use crate::core::limits::GROUP_POLL_INTERVAL;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

#[cfg(unix)]
use nix::sys::signal::{kill, killpg, Signal as UnixSignal};
#[cfg(unix)]
use nix::unistd::Pid as NixPid;

/// Signal the child's process group, falling back to the child alone
#[cfg(unix)]
fn signal_group(os_pid: u32, signal: UnixSignal) {
    let pid = NixPid::from_raw(os_pid as i32);
    if let Err(e) = killpg(pid, signal) {
        debug!(os_pid, ?signal, error = %e, "killpg failed, signalling process directly");
        if let Err(e) = kill(pid, signal) {
            debug!(os_pid, ?signal, error = %e, "kill failed");
        }
    }
}

/// Stop a child: SIGTERM its group, wait up to `grace`, then SIGKILL.
///
/// Returns the exit status. A child that already exited is reaped and
/// returned without signalling.
pub async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    let Some(os_pid) = child.id() else {
        return child.wait().await;
    };

    #[cfg(unix)]
    signal_group(os_pid, UnixSignal::SIGTERM);
    #[cfg(not(unix))]
    child.start_kill()?;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                os_pid,
                grace_ms = grace.as_millis() as u64,
                "Grace period elapsed, forcing termination"
            );
            #[cfg(unix)]
            signal_group(os_pid, UnixSignal::SIGKILL);
            child.kill().await?;
            child.wait().await
        }
    }
}

/// Stop whatever is left of an exited leader's process group
///
/// Members that outlive the leader (a server forked by a launcher script)
/// get SIGTERM, up to `grace` to exit, then SIGKILL. Returns whether any
/// member was still alive.
#[cfg(unix)]
pub async fn reap_group(os_pid: u32, grace: Duration) -> bool {
    let pgrp = NixPid::from_raw(os_pid as i32);
    if killpg(pgrp, UnixSignal::SIGTERM).is_err() {
        return false;
    }
    debug!(os_pid, "Process group outlived its leader, terminating members");

    let emptied = tokio::time::timeout(grace, async {
        while killpg(pgrp, None).is_ok() {
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        }
    })
    .await
    .is_ok();

    if !emptied {
        warn!(
            os_pid,
            grace_ms = grace.as_millis() as u64,
            "Orphaned group members ignored SIGTERM, killing"
        );
        signal_group(os_pid, UnixSignal::SIGKILL);
    }
    true
}

#[cfg(not(unix))]
pub async fn reap_group(_os_pid: u32, _grace: Duration) -> bool {
    false
}
