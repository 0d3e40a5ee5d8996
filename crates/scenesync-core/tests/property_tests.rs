//! Property-based tests for the alert buffer and its display projection
//!
//! Uses proptest to verify capacity, ordering, removal and partition
//! invariants over arbitrary alert sequences.

use proptest::prelude::*;
use scenesync_core::{
    AlertBuffer, AlertCounts, AlertFilterView, AlertSeverity, RawDesyncAlert, SessionEvent,
    SeverityFilter, SortOrder,
};
use tokio::sync::broadcast;

// ============================================================================
// Strategy Generators
// ============================================================================

/// Severity text as an engine might send it, in any casing
fn severity_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => Just("warning".to_string()),
        4 => Just("error".to_string()),
        1 => Just("WARNING".to_string()),
        1 => Just("Error".to_string()),
        1 => "[a-z]{1,8}",
    ]
}

/// Alerts with unique, arrival-ordered ids and arbitrary timestamps
fn alerts_strategy(max: usize) -> impl Strategy<Value = Vec<RawDesyncAlert>> {
    prop::collection::vec((severity_strategy(), 0i64..1_000), 0..max).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (severity, timestamp))| {
                let mut alert = RawDesyncAlert::new(severity, format!("deviation {}", i));
                alert.id = format!("alert-{}", i);
                alert.timestamp = timestamp;
                alert
            })
            .collect()
    })
}

fn filled_buffer(capacity: usize, alerts: &[RawDesyncAlert]) -> AlertBuffer {
    let (event_tx, _) = broadcast::channel::<SessionEvent>(16);
    let buffer = AlertBuffer::new(capacity, event_tx);
    for alert in alerts {
        buffer.ingest(alert.clone());
    }
    buffer
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Buffer keeps exactly the most recent arrivals, newest first
    #[test]
    fn buffer_keeps_most_recent(alerts in alerts_strategy(120)) {
        let buffer = filled_buffer(50, &alerts);

        prop_assert_eq!(buffer.len(), alerts.len().min(50));
        let expected: Vec<String> = alerts.iter().rev().take(50).map(|a| a.id.clone()).collect();
        let actual: Vec<String> = buffer.alerts().into_iter().map(|a| a.id).collect();
        prop_assert_eq!(actual, expected);
    }

    /// clear_one removes exactly the matching entry and nothing else
    #[test]
    fn clear_one_removes_only_match(alerts in alerts_strategy(60), pick in any::<prop::sample::Index>()) {
        let buffer = filled_buffer(50, &alerts);
        let before: Vec<String> = buffer.alerts().into_iter().map(|a| a.id).collect();

        prop_assert!(!buffer.clear_one("missing-id"));
        prop_assert_eq!(buffer.len(), before.len());

        if !before.is_empty() {
            let target = before[pick.index(before.len())].clone();
            prop_assert!(buffer.clear_one(&target));
            let after: Vec<String> = buffer.alerts().into_iter().map(|a| a.id).collect();
            let expected: Vec<String> = before.into_iter().filter(|id| *id != target).collect();
            prop_assert_eq!(after, expected);
        }

        buffer.clear_all();
        prop_assert!(buffer.is_empty());
    }

    /// Warning, Error and unrecognized partition the buffer
    #[test]
    fn severities_partition_buffer(alerts in alerts_strategy(80)) {
        let buffer = filled_buffer(50, &alerts);
        let stored = buffer.alerts();
        let counts = AlertCounts::from_alerts(&stored);

        prop_assert_eq!(counts.warnings + counts.errors + counts.unrecognized, stored.len());
        prop_assert_eq!(counts.total, stored.len());

        let warnings = AlertFilterView::new(SeverityFilter::Warning, SortOrder::Newest).apply(&stored);
        let errors = AlertFilterView::new(SeverityFilter::Error, SortOrder::Newest).apply(&stored);
        prop_assert_eq!(warnings.len(), counts.warnings);
        prop_assert_eq!(errors.len(), counts.errors);
        prop_assert!(warnings.iter().all(|a| a.severity == AlertSeverity::Warning));
        prop_assert!(errors.iter().all(|a| a.severity == AlertSeverity::Error));
        prop_assert_eq!(buffer.counts(), counts);
    }

    /// Sorting orders by timestamp and keeps arrival order for ties
    #[test]
    fn view_sort_is_stable(alerts in alerts_strategy(60)) {
        let buffer = filled_buffer(50, &alerts);
        let stored = buffer.alerts();
        let position = |id: &str| stored.iter().position(|a| a.id == id).unwrap();

        let newest = AlertFilterView::new(SeverityFilter::All, SortOrder::Newest).apply(&stored);
        prop_assert_eq!(newest.len(), stored.len());
        for pair in newest.windows(2) {
            prop_assert!(pair[0].timestamp >= pair[1].timestamp);
            if pair[0].timestamp == pair[1].timestamp {
                prop_assert!(position(&pair[0].id) < position(&pair[1].id));
            }
        }

        let oldest = AlertFilterView::new(SeverityFilter::All, SortOrder::Oldest).apply(&stored);
        for pair in oldest.windows(2) {
            prop_assert!(pair[0].timestamp <= pair[1].timestamp);
            if pair[0].timestamp == pair[1].timestamp {
                prop_assert!(position(&pair[0].id) < position(&pair[1].id));
            }
        }
    }
}
