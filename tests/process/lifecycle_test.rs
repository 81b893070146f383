/*!
 * Process Lifecycle Tests
 * Real children driven through start, exit, restart and stop
 */

use app_supervisor::config::Backoff;
use app_supervisor::{
    AppSpec, ConfigLoader, EventKind, InstanceState, ProcessController, RestartPolicy,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn sh(name: &str, script: &str) -> AppSpec {
    AppSpec::new(name, "/bin/sh", std::env::temp_dir()).with_args(["-c", script])
}

#[tokio::test]
async fn test_descriptor_without_autorestart_runs_once() {
    let apps = ConfigLoader::new()
        .from_json(
            &json!({ "name": "x", "command": "true", "cwd": "/tmp", "autorestart": false })
                .to_string(),
        )
        .unwrap();

    let controller = ProcessController::new();
    let handle = controller.start(Arc::new(apps[0].clone())).await.unwrap();

    let state = timeout(Duration::from_secs(5), handle.wait_terminal())
        .await
        .unwrap();
    assert_eq!(state, InstanceState::Stopped);
    assert_eq!(handle.restarts(), 0);
}

#[tokio::test]
async fn test_immediate_exit_is_bounded_by_max_restarts() {
    let controller = ProcessController::new();
    let mut events = controller.events().subscribe();

    let spec = sh("flaky", "exit 1").with_restart(RestartPolicy {
        max_restarts: 3,
        min_uptime: Duration::from_secs(10),
        backoff: Backoff::Fixed {
            delay: Duration::from_millis(20),
        },
        stop_exit_codes: vec![],
    });
    let handle = controller.start(Arc::new(spec)).await.unwrap();

    let state = timeout(Duration::from_secs(10), handle.wait_terminal())
        .await
        .unwrap();
    assert_eq!(state, InstanceState::Errored);
    assert_eq!(handle.restarts(), 3);

    let mut scheduled = Vec::new();
    let mut exhausted = false;
    while let Ok(event) = events.try_recv() {
        match event.kind {
            EventKind::RestartScheduled { attempt, .. } => scheduled.push(attempt),
            EventKind::RestartsExhausted { .. } => exhausted = true,
            _ => {}
        }
    }
    assert_eq!(scheduled, vec![1, 2, 3]);
    assert!(exhausted);
}

#[tokio::test]
async fn test_each_launch_gets_a_new_run_id() {
    let controller = ProcessController::new();
    let mut events = controller.events().subscribe();

    let spec = sh("rerun", "exit 0").with_restart(RestartPolicy {
        max_restarts: 1,
        min_uptime: Duration::from_secs(10),
        backoff: Backoff::Fixed {
            delay: Duration::from_millis(10),
        },
        stop_exit_codes: vec![],
    });
    let handle = controller.start(Arc::new(spec)).await.unwrap();
    timeout(Duration::from_secs(10), handle.wait_terminal())
        .await
        .unwrap();

    let mut run_ids = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EventKind::StateChanged {
            to: InstanceState::Running,
            ..
        } = event.kind
        {
            run_ids.push(event.run_id);
        }
    }
    assert_eq!(run_ids.len(), 2);
    assert_ne!(run_ids[0], run_ids[1]);
}

#[tokio::test]
async fn test_stop_escalates_to_sigkill() {
    let controller = ProcessController::new();
    let spec = sh("stubborn", "trap '' TERM; while true; do sleep 0.05; done")
        .with_kill_timeout(Duration::from_millis(300));

    let handle = controller.start(Arc::new(spec)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    timeout(Duration::from_secs(5), controller.stop(&handle))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(handle.state(), InstanceState::Stopped);
    assert_eq!(handle.last_exit().unwrap().signal, Some(9));
}

#[tokio::test]
async fn test_status_serializes() {
    let controller = ProcessController::new();
    let handle = controller
        .start(Arc::new(sh("visible", "sleep 30")))
        .await
        .unwrap();

    let status = serde_json::to_value(handle.status()).unwrap();
    assert_eq!(status["app"], "visible");
    assert_eq!(status["state"], "running");
    assert!(status["os_pid"].as_u64().is_some());
    assert!(status["started_at"].as_str().is_some());

    controller.stop_all().await;
}
