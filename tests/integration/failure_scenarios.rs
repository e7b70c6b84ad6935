//! Failure tests for the measurement loops
//!
//! These tests verify that failures never stop a loop:
//! - Busy, unreachable and malformed probe outcomes
//! - Storage failures while appending
//! - Cancellation of a probe in flight

use std::sync::Arc;
use std::time::Duration;

use throughput_monitor::{ProbeErrorKind, SchedulerEvent, storage::StorageBackend};
use tokio::time::sleep;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_three_busy_outcomes_append_nothing() {
    let probe = Arc::new(ScriptedProbe::failing(ProbeErrorKind::Busy));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    let mut events = monitor.subscribe();
    monitor.start().await.unwrap();

    sleep(Duration::from_secs(150)).await;

    assert_eq!(probe.calls(), 3, "busy target not retried at its interval");
    assert!(monitor.read_results("10.0.0.5", 5201).await.unwrap().is_empty());
    assert!(monitor.is_running("10.0.0.5", 5201).await);

    let state = monitor.state("10.0.0.5", 5201).await.unwrap();
    assert_eq!(state.consecutive_failures, 3);
    assert!(state.last_success.is_none());

    let mut failures = vec![];
    while let Ok(event) = events.try_recv() {
        if let SchedulerEvent::Failed {
            kind,
            consecutive_failures,
            ..
        } = event
        {
            failures.push((kind, consecutive_failures));
        }
    }
    assert_eq!(
        failures,
        vec![
            (ProbeErrorKind::Busy, 1),
            (ProbeErrorKind::Busy, 2),
            (ProbeErrorKind::Busy, 3)
        ]
    );

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_success_after_busy_resets_failures() {
    let probe = Arc::new(ScriptedProbe::succeeding(900.0, 850.0).then([
        Outcome::Fail(ProbeErrorKind::Busy),
        Outcome::Fail(ProbeErrorKind::Busy),
    ]));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    monitor.start().await.unwrap();

    sleep(Duration::from_secs(121)).await;

    assert_eq!(probe.calls(), 3);
    let results = monitor.read_results("10.0.0.5", 5201).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].sent_mbps, 900.0);

    let state = monitor.state("10.0.0.5", 5201).await.unwrap();
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_success.is_some());

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_target_is_retried_forever() {
    let probe = Arc::new(ScriptedProbe::failing(ProbeErrorKind::Unreachable));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("192.0.2.1", 5201, 10, 1)
        .await
        .unwrap();
    monitor.start().await.unwrap();

    sleep(Duration::from_secs(601)).await;

    assert_eq!(probe.calls(), 11);
    assert!(monitor.is_running("192.0.2.1", 5201).await);

    let summary = monitor.summarize("192.0.2.1", 5201).await.unwrap();
    assert_eq!(summary.count, 0);
    assert!(summary.stale);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_protocol_error_keeps_loop_alive() {
    let probe = Arc::new(
        ScriptedProbe::succeeding(100.0, 100.0).then([Outcome::Fail(ProbeErrorKind::ProtocolError)]),
    );
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    monitor.start().await.unwrap();

    sleep(Duration::from_secs(1)).await;
    assert!(monitor.read_results("10.0.0.5", 5201).await.unwrap().is_empty());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(monitor.read_results("10.0.0.5", 5201).await.unwrap().len(), 1);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_does_not_stop_loop() {
    let backend = Arc::new(FlakyBackend::default());
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = monitor_with(backend.clone() as Arc<dyn StorageBackend>, probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();

    backend.set_failing(true);
    monitor.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(probe.calls(), 1);
    assert!(monitor.read_results("10.0.0.5", 5201).await.unwrap().is_empty());
    assert!(monitor.is_running("10.0.0.5", 5201).await);

    backend.set_failing(false);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(monitor.read_results("10.0.0.5", 5201).await.unwrap().len(), 1);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_probe_result_is_discarded() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0).with_delay(Duration::from_secs(10)));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    let mut events = monitor.subscribe();
    monitor.start().await.unwrap();

    sleep(Duration::from_secs(2)).await;
    assert!(monitor.state("10.0.0.5", 5201).await.unwrap().running);
    assert!(monitor.stop_target("10.0.0.5", 5201).await);

    sleep(Duration::from_secs(60)).await;
    assert!(monitor.read_results("10.0.0.5", 5201).await.unwrap().is_empty());
    assert!(!monitor.is_running("10.0.0.5", 5201).await);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        saw_failure |= matches!(event, SchedulerEvent::Failed { .. });
    }
    assert!(!saw_failure, "cancellation reported as a probe failure");

    monitor.shutdown().await.unwrap();
}
