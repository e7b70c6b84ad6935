//! Scheduling and lifecycle tests
//!
//! All tests run on paused tokio time, so "a minute" passes instantly.

use std::sync::Arc;
use std::time::Duration;

use throughput_monitor::{
    SchedulerEvent, TargetId,
    registry::TargetRegistry,
    storage::{ResultRecord, StorageBackend, memory::MemoryBackend},
    util::unix_now,
};
use tokio::time::sleep;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_measures_immediately_and_again_after_interval() {
    let probe = Arc::new(ScriptedProbe::succeeding(940.2, 935.7));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();

    let mut events = monitor.subscribe();
    monitor.start().await.unwrap();

    match events.recv().await.unwrap() {
        SchedulerEvent::Recorded { target, record } => {
            assert_eq!(target, TargetId::new("10.0.0.5", 5201));
            assert_eq!(record.sent_mbps, 940.2);
            assert_eq!(record.received_mbps, 935.7);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let results = monitor.read_results("10.0.0.5", 5201).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(probe.requests()[0].duration, Duration::from_secs(10));

    sleep(Duration::from_secs(59)).await;
    assert_eq!(probe.calls(), 1, "second probe fired early");

    sleep(Duration::from_secs(2)).await;
    assert_eq!(probe.calls(), 2);
    assert_eq!(monitor.read_results("10.0.0.5", 5201).await.unwrap().len(), 2);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();

    assert_eq!(monitor.start().await.unwrap(), 1);
    assert_eq!(monitor.start().await.unwrap(), 1);
    sleep(Duration::from_secs(1)).await;

    assert_eq!(monitor.running().await.len(), 1);
    assert_eq!(probe.calls(), 1);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_target_added_while_running_starts_immediately() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = memory_monitor(probe.clone());
    monitor.start().await.unwrap();

    monitor
        .add_or_update_target("10.0.0.7", 5201, 5, 10)
        .await
        .unwrap();
    sleep(Duration::from_secs(1)).await;

    assert!(monitor.is_running("10.0.0.7", 5201).await);
    assert_eq!(probe.calls_for("10.0.0.7"), 1);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_remove_stops_probing_and_clears_results() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    monitor.start().await.unwrap();

    sleep(Duration::from_secs(1)).await;
    assert_eq!(monitor.read_results("10.0.0.5", 5201).await.unwrap().len(), 1);

    assert!(monitor.remove_target("10.0.0.5", 5201).await.unwrap());
    let calls = probe.calls();

    assert!(!monitor.is_running("10.0.0.5", 5201).await);
    assert!(monitor.read_results("10.0.0.5", 5201).await.unwrap().is_empty());
    assert!(monitor.list_targets().await.unwrap().is_empty());

    sleep(Duration::from_secs(300)).await;
    assert_eq!(probe.calls(), calls);
    assert!(monitor.read_results("10.0.0.5", 5201).await.unwrap().is_empty());

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_schedule_change_applies_to_running_loop() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    monitor.start().await.unwrap();

    sleep(Duration::from_secs(1)).await;
    monitor
        .add_or_update_target("10.0.0.5", 5201, 20, 2)
        .await
        .unwrap();

    sleep(Duration::from_secs(70)).await;
    assert_eq!(probe.calls(), 1, "old interval still in use");

    sleep(Duration::from_secs(55)).await;
    assert_eq!(probe.calls(), 2);
    assert_eq!(probe.requests()[1].duration, Duration::from_secs(20));

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconciler_follows_registry_changes_from_elsewhere() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = monitor_with(backend.clone(), probe.clone());
    monitor.start().await.unwrap();

    // Another process sharing the same storage
    let registry = TargetRegistry::new(backend);
    let (target, _) = registry.add("10.0.0.9", 5201, 10, 30).await.unwrap();

    sleep(Duration::from_secs(11)).await;
    assert!(monitor.is_running("10.0.0.9", 5201).await);
    assert_eq!(probe.calls(), 1);

    registry.remove(&target.id()).await.unwrap();
    sleep(Duration::from_secs(11)).await;
    assert!(!monitor.is_running("10.0.0.9", 5201).await);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_resumes_from_last_stored_result() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = monitor_with(backend.clone(), probe.clone());

    let target = monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    backend
        .append_result(
            &target.results_location,
            &ResultRecord::new(unix_now() - 30, 500.0, 400.0),
        )
        .await
        .unwrap();

    monitor.start().await.unwrap();

    sleep(Duration::from_secs(28)).await;
    assert_eq!(probe.calls(), 0, "history was ignored");

    sleep(Duration::from_secs(4)).await;
    assert_eq!(probe.calls(), 1);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_loop() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = memory_monitor(probe.clone());
    for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        monitor.add_or_update_target(host, 5201, 10, 1).await.unwrap();
    }
    monitor.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    monitor.shutdown().await.unwrap();
    assert!(monitor.running().await.is_empty());
    assert!(!monitor.is_started());

    let calls = probe.calls();
    sleep(Duration::from_secs(300)).await;
    assert_eq!(probe.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_stop_target_publishes_stopped() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    let mut events = monitor.subscribe();
    monitor.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert!(monitor.stop_target("10.0.0.5", 5201).await);
    assert!(!monitor.stop_target("10.0.0.5", 5201).await);

    let mut stopped = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SchedulerEvent::Stopped { .. }) {
            stopped = true;
        }
    }
    assert!(stopped);

    // Still registered, but start() leaves it stopped until asked
    assert_eq!(monitor.start().await.unwrap(), 0);
    assert!(monitor.start_target("10.0.0.5", 5201).await.unwrap());
    assert!(monitor.is_running("10.0.0.5", 5201).await);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stopped_target_survives_reconciles() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    monitor.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(probe.calls(), 1);

    assert!(monitor.stop_target("10.0.0.5", 5201).await);

    // Twelve reconciler passes and two missed intervals
    sleep(Duration::from_secs(120)).await;
    assert!(!monitor.is_running("10.0.0.5", 5201).await);
    assert_eq!(probe.calls(), 1);

    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    assert!(monitor.is_running("10.0.0.5", 5201).await);

    // Resumes one interval after the stored result
    sleep(Duration::from_secs(61)).await;
    assert_eq!(probe.calls(), 2);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_removal_elsewhere_during_run_leaves_no_results() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0).with_delay(Duration::from_secs(10)));
    let running = monitor_with(backend.clone(), probe.clone());
    running
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    running.start().await.unwrap();
    sleep(Duration::from_secs(2)).await;

    // A second process, such as the CLI, removes the target mid-run
    let cli = monitor_with(backend, probe.clone());
    assert!(cli.remove_target("10.0.0.5", 5201).await.unwrap());
    assert!(cli.read_results("10.0.0.5", 5201).await.unwrap().is_empty());

    sleep(Duration::from_secs(30)).await;
    assert!(cli.read_results("10.0.0.5", 5201).await.unwrap().is_empty());
    assert!(!running.is_running("10.0.0.5", 5201).await);
    assert_eq!(probe.calls(), 1);

    running.shutdown().await.unwrap();
}
