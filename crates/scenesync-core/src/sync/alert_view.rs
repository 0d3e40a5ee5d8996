//! Display projection over the alert buffer
//!
//! Stateless: a filter and a sort order applied to a snapshot of the
//! buffer. Badge counts are computed separately over the whole buffer so
//! they never depend on the active filter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::{AlertSeverity, DesyncAlert};

/// Severity filter for the alert list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeverityFilter {
    #[default]
    All,
    Warning,
    Error,
}

impl SeverityFilter {
    /// `All` matches every alert, unrecognized severities included
    pub fn matches(&self, severity: &AlertSeverity) -> bool {
        match self {
            SeverityFilter::All => true,
            SeverityFilter::Warning => *severity == AlertSeverity::Warning,
            SeverityFilter::Error => *severity == AlertSeverity::Error,
        }
    }
}

impl fmt::Display for SeverityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeverityFilter::All => write!(f, "all"),
            SeverityFilter::Warning => write!(f, "warning"),
            SeverityFilter::Error => write!(f, "error"),
        }
    }
}

impl FromStr for SeverityFilter {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(SeverityFilter::All),
            "warning" => Ok(SeverityFilter::Warning),
            "error" => Ok(SeverityFilter::Error),
            other => Err(SyncError::InvalidArgument(format!(
                "unknown severity filter '{}' (expected all, warning or error)",
                other
            ))),
        }
    }
}

/// Sort order by alert timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Newest => write!(f, "newest"),
            SortOrder::Oldest => write!(f, "oldest"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "newest" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            other => Err(SyncError::InvalidArgument(format!(
                "unknown sort order '{}' (expected newest or oldest)",
                other
            ))),
        }
    }
}

/// Badge counts over the unfiltered buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCounts {
    pub warnings: usize,
    pub errors: usize,
    pub unrecognized: usize,
    pub total: usize,
}

impl AlertCounts {
    pub fn from_alerts(alerts: &[DesyncAlert]) -> Self {
        let mut counts = AlertCounts {
            total: alerts.len(),
            ..Default::default()
        };
        for alert in alerts {
            match alert.severity {
                AlertSeverity::Warning => counts.warnings += 1,
                AlertSeverity::Error => counts.errors += 1,
                AlertSeverity::Unrecognized(_) => counts.unrecognized += 1,
            }
        }
        counts
    }
}

/// Filter plus sort order, applied to a buffer snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertFilterView {
    pub filter: SeverityFilter,
    pub order: SortOrder,
}

impl AlertFilterView {
    pub fn new(filter: SeverityFilter, order: SortOrder) -> Self {
        Self { filter, order }
    }

    /// Project `alerts` (buffer order, newest arrival first)
    ///
    /// The sort is stable, so alerts with equal timestamps keep buffer
    /// order in both directions.
    pub fn apply(&self, alerts: &[DesyncAlert]) -> Vec<DesyncAlert> {
        let mut visible: Vec<DesyncAlert> = alerts
            .iter()
            .filter(|alert| self.filter.matches(&alert.severity))
            .cloned()
            .collect();

        match self.order {
            SortOrder::Newest => visible.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
            SortOrder::Oldest => visible.sort_by_key(|alert| alert.timestamp),
        }
        visible
    }
}
