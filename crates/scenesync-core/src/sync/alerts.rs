//! Desync alert buffer and its engine feed
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  AlertFeed (one task per session)                               │
//! │  ├── awaits SyncBackend::subscribe_alerts()                     │
//! │  ├── cancel: CancellationToken, set on detach                   │
//! │  └── recv loop ──ingest──▶ AlertBuffer                          │
//! │                                                                 │
//! │  AlertBuffer                                                    │
//! │  ├── alerts: VecDeque<DesyncAlert>, newest arrival first        │
//! │  │   └── bounded (default 50); the oldest arrival is evicted    │
//! │  └── event_tx: AlertReceived / AlertsCleared                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::alert_view::{AlertCounts, AlertFilterView};
use super::events::SessionEvent;
use crate::backend::SyncBackend;
use crate::types::{DesyncAlert, RawDesyncAlert};

/// Bounded store of desync alerts in arrival order
///
/// Alerts are immutable once stored. Nothing here can fail: ingestion is
/// fire-and-forget and removal of an unknown id is a no-op.
pub struct AlertBuffer {
    alerts: RwLock<VecDeque<DesyncAlert>>,
    capacity: usize,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl AlertBuffer {
    /// `capacity` is clamped to at least one alert
    pub fn new(capacity: usize, event_tx: broadcast::Sender<SessionEvent>) -> Self {
        let capacity = capacity.max(1);
        Self {
            alerts: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            event_tx,
        }
    }

    /// Normalize and store an engine payload, evicting the oldest arrival
    /// when full
    pub fn ingest(&self, raw: RawDesyncAlert) -> DesyncAlert {
        let alert = DesyncAlert::from(raw);
        if !alert.severity.is_recognized() {
            warn!(id = %alert.id, severity = %alert.severity.as_str(), "Unrecognized desync alert severity");
        }

        {
            let mut alerts = self.alerts.write();
            alerts.push_front(alert.clone());
            alerts.truncate(self.capacity);
        }

        debug!(id = %alert.id, severity = %alert.severity.as_str(), "Desync alert stored");
        let _ = self.event_tx.send(SessionEvent::AlertReceived(alert.clone()));
        alert
    }

    /// Snapshot in buffer order (newest arrival first)
    pub fn alerts(&self) -> Vec<DesyncAlert> {
        self.alerts.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, id: &str) -> Option<DesyncAlert> {
        self.alerts.read().iter().find(|a| a.id == id).cloned()
    }

    /// Remove every alert with `id`; returns whether anything was removed
    pub fn clear_one(&self, id: &str) -> bool {
        let removed = {
            let mut alerts = self.alerts.write();
            let before = alerts.len();
            alerts.retain(|a| a.id != id);
            before - alerts.len()
        };

        if removed > 0 {
            debug!(id, "Desync alert cleared");
            let _ = self.event_tx.send(SessionEvent::AlertsCleared { removed });
        }
        removed > 0
    }

    /// Empty the buffer; returns the number of alerts removed
    pub fn clear_all(&self) -> usize {
        let removed = {
            let mut alerts = self.alerts.write();
            let removed = alerts.len();
            alerts.clear();
            removed
        };

        if removed > 0 {
            debug!(removed, "All desync alerts cleared");
            let _ = self.event_tx.send(SessionEvent::AlertsCleared { removed });
        }
        removed
    }

    pub fn counts(&self) -> AlertCounts {
        let alerts = self.alerts.read();
        let (front, back) = alerts.as_slices();
        let mut counts = AlertCounts::from_alerts(front);
        let tail = AlertCounts::from_alerts(back);
        counts.warnings += tail.warnings;
        counts.errors += tail.errors;
        counts.unrecognized += tail.unrecognized;
        counts.total += tail.total;
        counts
    }

    pub fn view(&self, view: &AlertFilterView) -> Vec<DesyncAlert> {
        view.apply(&self.alerts())
    }
}

/// Connection between the engine's alert channel and an [`AlertBuffer`]
///
/// Subscription setup is asynchronous. If [`detach`](Self::detach) runs
/// before setup completes, the subscription is released as soon as it
/// arrives instead of being stored.
pub struct AlertFeed {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AlertFeed {
    /// Spawn the feed task; must be called inside a tokio runtime
    pub fn attach(buffer: Arc<AlertBuffer>, backend: Arc<dyn SyncBackend>) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::run(buffer, backend, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    async fn run(buffer: Arc<AlertBuffer>, backend: Arc<dyn SyncBackend>, cancel: CancellationToken) {
        let mut subscription = match backend.subscribe_alerts().await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, "Failed to subscribe to desync alerts");
                return;
            }
        };

        if cancel.is_cancelled() {
            debug!("Alert subscription completed after detach, releasing it");
            subscription.unsubscribe();
            return;
        }
        debug!("Subscribed to desync alerts");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = subscription.recv() => match next {
                    Some(raw) => {
                        buffer.ingest(raw);
                    }
                    None => {
                        debug!("Desync alert channel closed");
                        break;
                    }
                },
            }
        }

        subscription.unsubscribe();
        debug!("Unsubscribed from desync alerts");
    }

    /// Request unsubscription; idempotent
    pub fn detach(&self) {
        self.cancel.cancel();
    }

    /// Detach and wait for the feed task to release its subscription
    pub async fn close(&mut self) {
        self.detach();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Alert feed task failed");
                }
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .task
                .as_ref()
                .map(|task| !task.is_finished())
                .unwrap_or(false)
    }
}

impl Drop for AlertFeed {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BackendCommand, ScriptedBackend};
    use crate::types::AlertSeverity;
    use std::time::Duration;

    fn buffer(capacity: usize) -> (AlertBuffer, broadcast::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = broadcast::channel(256);
        (AlertBuffer::new(capacity, event_tx), event_rx)
    }

    fn raw(id: &str, severity: &str) -> RawDesyncAlert {
        let mut raw = RawDesyncAlert::new(severity, format!("alert {}", id));
        raw.id = id.to_string();
        raw
    }

    #[test]
    fn test_ingest_prepends_and_normalizes() {
        let (buffer, _rx) = buffer(50);
        buffer.ingest(raw("a", "WARNING"));
        buffer.ingest(raw("b", "error"));

        let alerts = buffer.alerts();
        assert_eq!(alerts[0].id, "b");
        assert_eq!(alerts[0].severity, AlertSeverity::Error);
        assert_eq!(alerts[1].severity, AlertSeverity::Warning);
    }

    #[test]
    fn test_capacity_evicts_oldest_arrival() {
        let (buffer, _rx) = buffer(3);
        for i in 0..5 {
            buffer.ingest(raw(&i.to_string(), "warning"));
        }
        let ids: Vec<String> = buffer.alerts().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["4", "3", "2"]);
    }

    #[test]
    fn test_unrecognized_severity_passes_through() {
        let (buffer, _rx) = buffer(50);
        let alert = buffer.ingest(raw("x", " Critical "));
        assert_eq!(alert.severity, AlertSeverity::Unrecognized("critical".into()));
        assert_eq!(buffer.counts().unrecognized, 1);
    }

    #[test]
    fn test_clear_one_and_clear_all() {
        let (buffer, mut rx) = buffer(50);
        buffer.ingest(raw("a", "warning"));
        buffer.ingest(raw("b", "warning"));
        while rx.try_recv().is_ok() {}

        assert!(!buffer.clear_one("missing"));
        assert!(rx.try_recv().is_err());

        assert!(buffer.clear_one("a"));
        assert_eq!(buffer.len(), 1);
        assert!(buffer.get("a").is_none());
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::AlertsCleared { removed: 1 })));

        assert_eq!(buffer.clear_all(), 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.clear_all(), 0);
    }

    #[tokio::test]
    async fn test_feed_ingests_pushed_alerts() {
        let backend = Arc::new(ScriptedBackend::new());
        let (buffer, _rx) = buffer(50);
        let buffer = Arc::new(buffer);
        let mut feed = AlertFeed::attach(buffer.clone(), backend.clone());

        while backend.live_subscriptions() == 0 {
            tokio::task::yield_now().await;
        }
        backend.push_alert(raw("a", "warning"));
        while buffer.is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(buffer.alerts()[0].id, "a");

        feed.close().await;
        assert_eq!(backend.live_subscriptions(), 0);
        assert!(!feed.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_before_setup_completes_releases_subscription() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_delay(BackendCommand::SubscribeAlerts, Duration::from_millis(500));
        let (buffer, _rx) = buffer(50);
        let mut feed = AlertFeed::attach(Arc::new(buffer), backend.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.live_subscriptions(), 1);
        feed.detach();
        feed.detach();

        feed.close().await;
        assert_eq!(backend.live_subscriptions(), 0);
    }
}
