//! Concurrency tests
//!
//! These tests verify:
//! - Probes for one target never overlap
//! - Targets are measured independently of each other
//! - A slow target does not hold up the rest

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_now_waits_for_probe_in_flight() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0).with_delay(Duration::from_secs(10)));
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("10.0.0.5", 5201, 10, 1)
        .await
        .unwrap();
    monitor.start().await.unwrap();

    // Scheduled probe runs from t=0 to t=10
    sleep(Duration::from_secs(1)).await;

    let (first, second) = tokio::join!(
        monitor.test_now("10.0.0.5", 5201),
        monitor.test_now("10.0.0.5", 5201)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(probe.calls(), 3);
    assert_eq!(probe.overlaps(), 0);
    assert_eq!(monitor.read_results("10.0.0.5", 5201).await.unwrap().len(), 3);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_targets_are_measured_concurrently() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0).with_delay(Duration::from_secs(10)));
    let monitor = memory_monitor(probe.clone());
    for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        monitor.add_or_update_target(host, 5201, 10, 1).await.unwrap();
    }
    monitor.start().await.unwrap();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(probe.max_concurrent(), 3);

    sleep(Duration::from_secs(10)).await;
    for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        assert_eq!(monitor.read_results(host, 5201).await.unwrap().len(), 1);
    }

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_slow_target_does_not_block_others() {
    let probe = Arc::new(
        ScriptedProbe::succeeding(100.0, 100.0).with_host_delay("slow.example", Duration::from_secs(100)),
    );
    let monitor = memory_monitor(probe.clone());
    monitor
        .add_or_update_target("slow.example", 5201, 10, 1)
        .await
        .unwrap();
    monitor
        .add_or_update_target("fast.example", 5201, 10, 1)
        .await
        .unwrap();
    monitor.start().await.unwrap();

    sleep(Duration::from_secs(130)).await;

    assert_eq!(probe.calls_for("fast.example"), 3);
    // Started at 0, overdue at 100, so the second run starts right away
    assert_eq!(probe.calls_for("slow.example"), 2);
    assert_eq!(probe.overlaps(), 0);

    monitor.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_many_targets_start_together() {
    let probe = Arc::new(ScriptedProbe::succeeding(100.0, 100.0));
    let monitor = memory_monitor(probe.clone());
    for i in 1..=20 {
        monitor
            .add_or_update_target(&format!("10.0.1.{i}"), 5201, 10, 1)
            .await
            .unwrap();
    }

    assert_eq!(monitor.start().await.unwrap(), 20);
    sleep(Duration::from_secs(1)).await;

    assert_eq!(monitor.running().await.len(), 20);
    assert_eq!(probe.calls(), 20);
    assert_eq!(probe.overlaps(), 0);

    monitor.shutdown().await.unwrap();
}
