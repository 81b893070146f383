/*!
 * Memory Ceiling Tests
 */

use app_supervisor::process::MemorySampler;
use app_supervisor::{AppSpec, EventKind, InstanceState, ProcessController};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Reports a fixed reading for every pid
struct FixedSampler(Arc<AtomicU64>);

impl MemorySampler for FixedSampler {
    fn resident_bytes(&self, _pid: u32) -> Option<u64> {
        Some(self.0.load(Ordering::SeqCst))
    }
}

fn sleeper() -> AppSpec {
    AppSpec::new("sleeper", "/bin/sh", std::env::temp_dir())
        .with_args(["-c", "sleep 30"])
        .with_max_memory(1 << 30)
        .with_kill_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_over_ceiling_passes_through_restarting() {
    let reading = Arc::new(AtomicU64::new(2 << 30));
    let controller = ProcessController::builder()
        .with_sampler(FixedSampler(Arc::clone(&reading)))
        .with_memory_interval(Duration::from_millis(100))
        .build();
    let mut events = controller.events().subscribe();

    let handle = controller.start(Arc::new(sleeper())).await.unwrap();
    let first_pid = handle.os_pid();

    let restarting = timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if let EventKind::StateChanged {
                from: InstanceState::Running,
                to: InstanceState::Restarting,
            } = event.kind
            {
                return event;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(restarting.app, "sleeper");

    // Stop further breaches, then wait for the relaunch
    reading.store(1024, Ordering::SeqCst);
    timeout(
        Duration::from_secs(5),
        handle.wait_for(InstanceState::is_running),
    )
    .await
    .unwrap();

    assert!(handle.restarts() >= 1);
    assert_ne!(handle.os_pid(), first_pid);

    controller.stop(&handle).await.unwrap();
    assert_eq!(handle.state(), InstanceState::Stopped);
}

#[tokio::test]
async fn test_under_ceiling_keeps_running() {
    let reading = Arc::new(AtomicU64::new(512 << 20));
    let controller = ProcessController::builder()
        .with_sampler(FixedSampler(reading))
        .with_memory_interval(Duration::from_millis(50))
        .build();

    let handle = controller.start(Arc::new(sleeper())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(handle.state(), InstanceState::Running);
    assert_eq!(handle.restarts(), 0);
    assert_eq!(handle.status().memory_bytes, Some(512 << 20));

    controller.stop(&handle).await.unwrap();
}
