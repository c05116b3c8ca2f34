mod common;

use std::sync::Arc;
use std::time::Duration;

use session_core::{
    spawn_session, DashboardConfig, DecodeError, Diagnostic, SessionPhase, UpdateKind,
    WebSocketConnector,
};
use tokio::sync::mpsc::unbounded_channel;

use common::{connected_session, wait_for_payloads, ScriptedBackend};

#[tokio::test]
async fn malformed_payload_is_dropped_and_reported_once() -> anyhow::Result<()> {
    let mut backend = ScriptedBackend::spawn().await?;
    let session = connected_session(&mut backend).await;
    let diagnostics = session.diagnostics();

    backend.push_snapshot(1, 10, 5);
    backend.push_snapshot(2, 9, 6);
    backend.push(r#"{"cycleCount":2,"dooderCount":"#);
    backend.push_snapshot(3, 8, 7);
    wait_for_payloads(&session, 4).await;

    let snapshots = session.session().await;
    let cycles: Vec<u64> = snapshots.iter().map(|s| s.cycle_count).collect();
    assert_eq!(cycles, vec![1, 2, 3]);
    assert_eq!(snapshots[1].dooder_count, 9);
    assert_eq!(session.live_aggregate().await.cycle_count, 3);

    let rejected: Vec<Diagnostic> = diagnostics
        .try_iter()
        .filter(|d| matches!(d, Diagnostic::DecodeRejected { .. }))
        .collect();
    assert_eq!(rejected.len(), 1);
    assert!(matches!(
        rejected[0],
        Diagnostic::DecodeRejected {
            error: DecodeError::MalformedPayload { .. },
            ..
        }
    ));
    assert_eq!(session.status().phase(), SessionPhase::Live);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn backend_pascal_case_snapshots_are_accepted() -> anyhow::Result<()> {
    let mut backend = ScriptedBackend::spawn().await?;
    let session = connected_session(&mut backend).await;

    backend.push(
        r#"{"CycleCount":4,"DooderCount":12,"EnergyCount":30,
            "DirectionCounts":{"up":5,"left":7},"TotalDooderEnergySupply":48}"#,
    );
    wait_for_payloads(&session, 1).await;

    let live = session.live_aggregate().await;
    assert_eq!(live.cycle_count, 4);
    assert_eq!(live.direction_counts.get("left"), Some(&7));
    assert_eq!(
        live.extra.get("TotalDooderEnergySupply"),
        Some(&serde_json::json!(48))
    );

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn schema_mismatches_leave_the_session_unchanged() -> anyhow::Result<()> {
    let mut backend = ScriptedBackend::spawn().await?;
    let session = connected_session(&mut backend).await;

    backend.push_snapshot(1, 10, 5);
    backend.push(r#"{"cycleCount":2,"energyCount":6}"#);
    backend.push(r#"{"cycleCount":2,"dooderCount":-3,"energyCount":6}"#);
    backend.push(r#"{"cycleCount":2,"dooderCount":9,"energyCount":6,"directionCounts":{"up":"x"}}"#);
    wait_for_payloads(&session, 4).await;

    assert_eq!(session.session().await.len(), 1);
    let metrics = session.metrics().await;
    assert_eq!(metrics.snapshots_accepted, 1);
    assert_eq!(metrics.decode_failures, 3);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unsubscribed_consumer_stops_receiving() -> anyhow::Result<()> {
    let mut backend = ScriptedBackend::spawn().await?;
    let session = connected_session(&mut backend).await;

    let (tx, mut rx) = unbounded_channel();
    let subscription = session.subscribe(move |update| {
        let _ = tx.send((update.kind, update.aggregate.cycle_count));
    });
    let (other_tx, mut other_rx) = unbounded_channel();
    let _other = session.subscribe(move |update| {
        let _ = other_tx.send(update.snapshots.len());
    });

    backend.push_snapshot(1, 10, 5);
    backend.push_snapshot(2, 9, 6);
    wait_for_payloads(&session, 2).await;
    drop(subscription);
    backend.push_snapshot(3, 8, 7);
    wait_for_payloads(&session, 3).await;

    let mut seen = Vec::new();
    while let Ok(update) = rx.try_recv() {
        seen.push(update);
    }
    assert_eq!(
        seen,
        vec![(UpdateKind::Appended, 1), (UpdateKind::Appended, 2)]
    );

    let mut lengths = Vec::new();
    while let Ok(len) = tokio::time::timeout(Duration::from_millis(100), other_rx.recv()).await {
        match len {
            Some(len) => lengths.push(len),
            None => break,
        }
    }
    assert_eq!(lengths, vec![1, 2, 3]);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unread_diagnostics_stay_bounded() -> anyhow::Result<()> {
    let mut backend = ScriptedBackend::spawn().await?;
    let config = DashboardConfig {
        diagnostics_capacity: 4,
        ..backend.config()
    };
    let session = spawn_session(&config, Arc::new(WebSocketConnector));
    session.connect().await?;
    backend.wait_for_connection().await;
    let diagnostics = session.diagnostics();

    for _ in 0..10 {
        backend.push("not a snapshot");
    }
    wait_for_payloads(&session, 10).await;

    assert_eq!(diagnostics.try_iter().count(), 4);
    let metrics = session.metrics().await;
    assert_eq!(metrics.decode_failures, 10);
    assert_eq!(metrics.diagnostics_dropped, 6);

    session.shutdown().await;
    Ok(())
}
