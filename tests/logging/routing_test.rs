/*!
 * Log Routing Tests
 * Child output reaching out_file, error_file and log_file
 */

use app_supervisor::{
    AppSpec, ConfigLoader, EventKind, InstanceState, LogPaths, ProcessController,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

async fn run_to_completion(controller: &ProcessController, spec: AppSpec) {
    let handle = controller.start(Arc::new(spec)).await.unwrap();
    let state = timeout(Duration::from_secs(10), handle.wait_terminal())
        .await
        .unwrap();
    assert_eq!(state, InstanceState::Stopped);
}

#[tokio::test]
async fn test_stdout_order_in_out_and_combined() {
    let dir = tempfile::tempdir().unwrap();
    let logs = LogPaths {
        out: Some(dir.path().join("out.log")),
        error: Some(dir.path().join("error.log")),
        combined: Some(dir.path().join("combined.log")),
        merge: false,
    };
    let spec = AppSpec::new("echo", "/bin/sh", dir.path())
        .with_args(["-c", "for i in 1 2 3 4 5; do echo line$i; done; echo bad >&2"])
        .with_autorestart(false)
        .with_logs(logs.clone());

    run_to_completion(&ProcessController::new(), spec).await;

    let expected = "line1\nline2\nline3\nline4\nline5\n";
    assert_eq!(read(logs.out.as_deref().unwrap()), expected);
    assert_eq!(read(logs.error.as_deref().unwrap()), "bad\n");

    let combined = read(logs.combined.as_deref().unwrap());
    let stdout_only: Vec<_> = combined.lines().filter(|l| l.starts_with("line")).collect();
    assert_eq!(stdout_only, vec!["line1", "line2", "line3", "line4", "line5"]);
    assert_eq!(combined.lines().filter(|l| *l == "bad").count(), 1);
}

#[tokio::test]
async fn test_logs_append_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.log");
    let mut spec = AppSpec::new("twice", "/bin/sh", dir.path())
        .with_args(["-c", "echo run"])
        .with_logs(LogPaths {
            out: Some(out.clone()),
            ..Default::default()
        });
    spec.restart.max_restarts = 1;
    spec.restart.min_uptime = Duration::from_secs(10);
    spec.restart.backoff = app_supervisor::config::Backoff::Fixed {
        delay: Duration::from_millis(10),
    };

    let controller = ProcessController::new();
    let handle = controller.start(Arc::new(spec)).await.unwrap();
    timeout(Duration::from_secs(10), handle.wait_terminal())
        .await
        .unwrap();

    assert_eq!(read(&out), "run\nrun\n");
}

#[tokio::test]
async fn test_time_prefixed_lines_from_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = json!({
        "name": "stamped",
        "script": "sh",
        "args": ["-c", "echo ready"],
        "cwd": dir.path(),
        "autorestart": false,
        "out_file": "logs/out.log",
        "time": true
    });
    let apps = ConfigLoader::new()
        .with_root(dir.path())
        .from_json(&descriptor.to_string())
        .unwrap();

    run_to_completion(&ProcessController::new(), apps[0].clone()).await;

    let out = read(&dir.path().join("logs/out.log"));
    let (stamp, line) = out.split_once(": ").unwrap();
    assert_eq!(line, "ready\n");
    let format = time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    assert!(time::PrimitiveDateTime::parse(stamp, format).is_ok());
}

#[tokio::test]
async fn test_unwritable_destination_degrades_but_runs() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("plain-file");
    std::fs::write(&blocker, "").unwrap();

    let controller = ProcessController::new();
    let mut events = controller.events().subscribe();

    let spec = AppSpec::new("degraded", "/bin/sh", dir.path())
        .with_args(["-c", "echo still running"])
        .with_autorestart(false)
        .with_logs(LogPaths {
            out: Some(blocker.join("out.log")),
            combined: Some(dir.path().join("all.log")),
            ..Default::default()
        });

    run_to_completion(&controller, spec).await;

    let mut degraded = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event.kind, EventKind::LogSinkDegraded { .. }) {
            degraded += 1;
        }
    }
    assert_eq!(degraded, 1);
    assert_eq!(read(&dir.path().join("all.log")), "still running\n");
}

#[tokio::test]
async fn test_instances_get_their_own_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = AppSpec::new("multi", "/bin/sh", dir.path())
        .with_args(["-c", "echo instance $NODE_APP_INSTANCE"])
        .with_autorestart(false)
        .with_logs(LogPaths {
            out: Some(dir.path().join("out.log")),
            ..Default::default()
        });
    spec.instances = 2;

    let controller = ProcessController::new();
    let spec = Arc::new(spec);
    let first = controller.start(Arc::clone(&spec)).await.unwrap();
    let second = controller.start(Arc::clone(&spec)).await.unwrap();
    for handle in [first, second] {
        timeout(Duration::from_secs(10), handle.wait_terminal())
            .await
            .unwrap();
    }

    assert_eq!(read(&dir.path().join("out-0.log")), "instance 0\n");
    assert_eq!(read(&dir.path().join("out-1.log")), "instance 1\n");
}
