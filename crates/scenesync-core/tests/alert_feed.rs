//! Desync alert ingestion through a session
//!
//! Alerts arrive on the engine's push channel independently of the
//! connection lifecycle; these tests cover delivery, ordering, capacity and
//! the subscribe/teardown race.

use std::sync::Arc;
use std::time::Duration;

use scenesync_core::testing::{BackendCommand, ScriptedBackend};
use scenesync_core::{
    AlertFilterView, AlertSeverity, CoordinatorConfig, NetworkRole, RawDesyncAlert, SessionEvent,
    SeverityFilter, SortOrder, SyncSession,
};

async fn wait_for_subscription(backend: &ScriptedBackend) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.live_subscriptions() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("alert subscription was never set up");
}

async fn wait_for_len(session: &SyncSession, len: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.alerts().len() < len {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("alerts were not ingested");
}

fn alert_at(id: &str, timestamp: i64, severity: &str) -> RawDesyncAlert {
    let mut alert = RawDesyncAlert::new(severity, format!("deviation {}", id))
        .with_scene("Main")
        .with_source("");
    alert.id = id.to_string();
    alert.timestamp = timestamp;
    alert
}

#[tokio::test]
async fn test_alerts_arrive_without_a_role() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = SyncSession::new(backend.clone(), CoordinatorConfig::default()).unwrap();
    let mut events = session.subscribe();
    wait_for_subscription(&backend).await;

    backend.push_alert(alert_at("a", 100, "Warning"));
    wait_for_len(&session, 1).await;

    let alerts = session.alerts().alerts();
    let stored = &alerts[0];
    assert_eq!(stored.severity, AlertSeverity::Warning);
    assert_eq!(stored.scene_name.as_deref(), Some("Main"));
    assert_eq!(stored.source_name, None);
    assert!(matches!(events.recv().await, Ok(SessionEvent::AlertReceived(_))));
    assert_eq!(session.role(), None);
}

#[tokio::test]
async fn test_sorting_scenario() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = SyncSession::new(backend.clone(), CoordinatorConfig::default()).unwrap();
    session.select_role(NetworkRole::Slave).unwrap();
    wait_for_subscription(&backend).await;

    backend.push_alert(alert_at("a", 100, "warning"));
    backend.push_alert(alert_at("b", 200, "error"));
    backend.push_alert(alert_at("c", 300, "warning"));
    wait_for_len(&session, 3).await;

    let newest = session.alert_view(&AlertFilterView::new(SeverityFilter::All, SortOrder::Newest));
    assert_eq!(newest.iter().map(|a| a.timestamp).collect::<Vec<_>>(), vec![300, 200, 100]);
    let oldest = session.alert_view(&AlertFilterView::new(SeverityFilter::All, SortOrder::Oldest));
    assert_eq!(oldest.iter().map(|a| a.timestamp).collect::<Vec<_>>(), vec![100, 200, 300]);

    let warnings =
        session.alert_view(&AlertFilterView::new(SeverityFilter::Warning, SortOrder::Newest));
    assert_eq!(warnings.len(), 2);
    // Badge counts ignore the filter
    let counts = session.snapshot().alerts;
    assert_eq!((counts.warnings, counts.errors, counts.total), (2, 1, 3));
}

#[tokio::test]
async fn test_capacity_from_config() {
    let backend = Arc::new(ScriptedBackend::new());
    let config = CoordinatorConfig {
        alert_capacity: 3,
        ..Default::default()
    };
    let session = SyncSession::new(backend.clone(), config).unwrap();
    wait_for_subscription(&backend).await;

    for i in 0..5 {
        backend.push_alert(alert_at(&i.to_string(), i, "error"));
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.alerts().get("4").is_none() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let ids: Vec<String> = session.alerts().alerts().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec!["4", "3", "2"]);
}

#[tokio::test]
async fn test_clear_one_and_all() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = SyncSession::new(backend.clone(), CoordinatorConfig::default()).unwrap();
    wait_for_subscription(&backend).await;

    backend.push_alert(alert_at("a", 1, "warning"));
    backend.push_alert(alert_at("b", 2, "warning"));
    wait_for_len(&session, 2).await;

    assert!(!session.clear_alert("zzz"));
    assert_eq!(session.alerts().len(), 2);
    assert!(session.clear_alert("a"));
    assert_eq!(session.alerts().alerts()[0].id, "b");
    assert_eq!(session.clear_all_alerts(), 1);
    assert!(session.alerts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_subscription_completes() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_delay(BackendCommand::SubscribeAlerts, Duration::from_secs(2));
    let session = SyncSession::new(backend.clone(), CoordinatorConfig::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.live_subscriptions(), 1);

    session.shutdown().await;
    assert_eq!(backend.live_subscriptions(), 0);

    // Nothing is ingested after teardown
    backend.push_alert(alert_at("late", 1, "error"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.alerts().is_empty());
}

#[tokio::test]
async fn test_subscribe_failure_is_not_fatal() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.fail_next(BackendCommand::SubscribeAlerts, "channel unavailable");
    let session = SyncSession::new(backend.clone(), CoordinatorConfig::default()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.call_count(BackendCommand::SubscribeAlerts) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    session.select_role(NetworkRole::Master).unwrap();
    session.start_as_master(8080).await.unwrap();
    assert!(session.status().is_connected());
    assert_eq!(backend.live_subscriptions(), 0);
}

#[tokio::test]
async fn test_unrecognized_severity_counts_separately() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = SyncSession::new(backend.clone(), CoordinatorConfig::default()).unwrap();
    wait_for_subscription(&backend).await;

    backend.push_alert(alert_at("a", 1, "CRITICAL"));
    wait_for_len(&session, 1).await;

    assert_eq!(
        session.alerts().alerts()[0].severity,
        AlertSeverity::Unrecognized("critical".into())
    );
    let counts = session.snapshot().alerts;
    assert_eq!((counts.warnings, counts.errors, counts.unrecognized), (0, 0, 1));
    assert!(session
        .alert_view(&AlertFilterView::new(SeverityFilter::Error, SortOrder::Newest))
        .is_empty());
}
