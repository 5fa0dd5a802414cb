//! End-to-end tests for the correlation actor
//!
//! Signals go in through the handle, correlated events come out of the
//! broadcast channel. Time is paused so expiry can be driven explicitly.

use std::time::Duration;

use outpost::{
    actors::correlator::CorrelationHandle,
    config::CorrelationConfig,
    correlation::{
        FlapPolicy,
        event::{
            CorrelatedEvent, CorrelatedEventKind, SERVICE_FLAPPING_UEI, WIDE_SPREAD_OUTAGE_UEI,
        },
    },
};
use tokio::sync::broadcast;

use crate::helpers::*;

fn config() -> CorrelationConfig {
    CorrelationConfig {
        wide_spread_threshold: 3,
        flap_count: 3,
        flap_interval_ms: 1000,
        sweep_interval_ms: 100,
        ..CorrelationConfig::default()
    }
}

fn drain(event_rx: &mut broadcast::Receiver<CorrelatedEvent>) -> Vec<CorrelatedEventKind> {
    let mut kinds = vec![];
    while let Ok(event) = event_rx.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

#[tokio::test(start_paused = true)]
async fn test_wide_spread_outage_lifecycle() {
    let (event_tx, mut event_rx) = broadcast::channel(64);
    let handle = CorrelationHandle::spawn(config(), event_tx);

    for monitor in [7, 8, 9] {
        handle.correlate(lost(monitor)).await.unwrap();
    }

    assert_eq!(drain(&mut event_rx), vec![CorrelatedEventKind::WideSpreadOutage]);
    assert_eq!(handle.memory_size().await.unwrap(), 4);

    for monitor in [7, 8, 9] {
        handle.correlate(regained(monitor)).await.unwrap();
    }

    assert_eq!(
        drain(&mut event_rx),
        vec![CorrelatedEventKind::WideSpreadOutageResolved]
    );
    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.flap_trackers, 3);
    assert_eq!(stats.total(), 3);

    tokio::time::advance(Duration::from_millis(1000)).await;
    assert_eq!(handle.memory_size().await.unwrap(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_flapping_monitor_reported_once() {
    let (event_tx, mut event_rx) = broadcast::channel(64);
    let handle = CorrelationHandle::spawn(config(), event_tx);

    for _ in 0..4 {
        handle.submit(lost(7)).await.unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
        handle.submit(regained(7)).await.unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
    }

    assert_eq!(handle.memory_size().await.unwrap(), 1);

    let event = event_rx.recv().await.unwrap();
    assert_eq!(event.uei, SERVICE_FLAPPING_UEI);
    assert_eq!(event.location_monitor_id, Some(7));
    assert!(drain(&mut event_rx).is_empty());

    tokio::time::advance(Duration::from_millis(1000)).await;
    assert_eq!(handle.memory_size().await.unwrap(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reset_policy_reports_each_burst() {
    let (event_tx, mut event_rx) = broadcast::channel(64);
    let handle = CorrelationHandle::spawn(
        CorrelationConfig {
            flap_policy: FlapPolicy::Reset,
            ..config()
        },
        event_tx,
    );

    for _ in 0..3 {
        handle.submit(lost(7)).await.unwrap();
        handle.submit(regained(7)).await.unwrap();
    }
    handle.memory_size().await.unwrap();

    assert_eq!(
        drain(&mut event_rx),
        vec![
            CorrelatedEventKind::ServiceFlapping,
            CorrelatedEventKind::ServiceFlapping
        ]
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sweep_resolves_timed_out_outage() {
    let (event_tx, mut event_rx) = broadcast::channel(64);
    let handle = CorrelationHandle::spawn(
        CorrelationConfig {
            affliction_timeout_secs: Some(30),
            ..config()
        },
        event_tx,
    );

    for monitor in [7, 8, 9] {
        handle.submit(lost(monitor)).await.unwrap();
    }
    let outage = event_rx.recv().await.unwrap();
    assert_eq!(outage.uei, WIDE_SPREAD_OUTAGE_UEI);

    // the ticker sweeps without any further signal
    let resolved = event_rx.recv().await.unwrap();
    assert_eq!(resolved.kind, CorrelatedEventKind::WideSpreadOutageResolved);
    assert_eq!(handle.memory_size().await.unwrap(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manual_sweep_returns_expiry_events() {
    let (event_tx, _event_rx) = broadcast::channel(64);
    let handle = CorrelationHandle::spawn(
        CorrelationConfig {
            wide_spread_threshold: 1,
            affliction_timeout_secs: Some(5),
            sweep_interval_ms: 3_600_000,
            ..config()
        },
        event_tx,
    );

    let events = handle.correlate(lost(7)).await.unwrap();
    assert_eq!(events.len(), 1);

    tokio::time::advance(Duration::from_secs(5)).await;

    let events = handle.sweep().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, CorrelatedEventKind::WideSpreadOutageResolved);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_signals_from_many_handles() {
    let (event_tx, mut event_rx) = broadcast::channel(64);
    let handle = CorrelationHandle::spawn(config(), event_tx);

    let mut tasks = vec![];
    for monitor in [7, 7, 7, 8, 8, 9] {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move { handle.submit(lost(monitor)).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.afflictions, 3);
    assert_eq!(stats.wide_spread_outages, 1);
    assert_eq!(drain(&mut event_rx), vec![CorrelatedEventKind::WideSpreadOutage]);

    handle.shutdown().await.unwrap();
}
