//! Core types for the scene sync coordinator

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{SyncError, SyncResult};

/// Lowest port accepted for master/slave networking
pub const MIN_PORT: u16 = 1024;

/// Default port the master listens on
pub const DEFAULT_MASTER_PORT: u16 = 8080;

/// Check that a port is in the usable 1024-65535 range
pub fn validate_port(port: u16) -> SyncResult<u16> {
    if port < MIN_PORT {
        return Err(SyncError::InvalidPort(port));
    }
    Ok(port)
}

/// Network role of this node in the LAN sync topology
///
/// A Master observes the local production tool and broadcasts changes;
/// a Slave receives those broadcasts and applies them locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkRole {
    Master,
    Slave,
}

impl NetworkRole {
    /// Lowercase name, used for log instance names and CLI output
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkRole::Master => "master",
            NetworkRole::Slave => "slave",
        }
    }
}

impl fmt::Display for NetworkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkRole::Master => write!(f, "Master"),
            NetworkRole::Slave => write!(f, "Slave"),
        }
    }
}

/// Category of scene state eligible for synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTarget {
    Source,
    Preview,
    Program,
}

impl SyncTarget {
    pub const ALL: [SyncTarget; 3] = [SyncTarget::Source, SyncTarget::Preview, SyncTarget::Program];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTarget::Source => "source",
            SyncTarget::Preview => "preview",
            SyncTarget::Program => "program",
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTarget {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "source" => Ok(SyncTarget::Source),
            "preview" => Ok(SyncTarget::Preview),
            "program" => Ok(SyncTarget::Program),
            other => Err(SyncError::InvalidArgument(format!(
                "unknown sync target '{}' (expected source, preview or program)",
                other
            ))),
        }
    }
}

/// Set of sync targets; duplicates are impossible and order carries no meaning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncTargetSet(BTreeSet<SyncTarget>);

impl SyncTargetSet {
    /// An empty set
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    pub fn contains(&self, target: SyncTarget) -> bool {
        self.0.contains(&target)
    }

    /// Flip membership of `target`, returning whether it is now selected
    pub fn toggle(&mut self, target: SyncTarget) -> bool {
        if self.0.remove(&target) {
            false
        } else {
            self.0.insert(target);
            true
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = SyncTarget> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<SyncTarget> {
        self.iter().collect()
    }
}

impl Default for SyncTargetSet {
    /// Program and Source, the targets selected at session start
    fn default() -> Self {
        [SyncTarget::Program, SyncTarget::Source].into_iter().collect()
    }
}

impl FromIterator<SyncTarget> for SyncTargetSet {
    fn from_iter<I: IntoIterator<Item = SyncTarget>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for SyncTargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(none)");
        }
        let names: Vec<&str> = self.iter().map(|t| t.as_str()).collect();
        write!(f, "{}", names.join(", "))
    }
}

/// Severity of a desync alert after normalization
///
/// Engine payloads carry free text; matching is case-insensitive. Values
/// other than warning/error are kept as `Unrecognized` with the case-folded
/// text so no report is lost and none is miscounted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertSeverity {
    Warning,
    Error,
    Unrecognized(String),
}

impl AlertSeverity {
    /// Normalize raw severity text from an engine payload
    pub fn normalize(raw: &str) -> Self {
        let folded = raw.trim().to_lowercase();
        match folded.as_str() {
            "warning" => AlertSeverity::Warning,
            "error" => AlertSeverity::Error,
            _ => AlertSeverity::Unrecognized(folded),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Unrecognized(raw) => raw,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, AlertSeverity::Unrecognized(_))
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "Warning"),
            AlertSeverity::Error => write!(f, "Error"),
            AlertSeverity::Unrecognized(raw) => write!(f, "Unrecognized({})", raw),
        }
    }
}

/// `desync-alert` payload as pushed by the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDesyncAlert {
    pub id: String,
    /// Milliseconds since the Unix epoch, stamped when the deviation was detected
    pub timestamp: i64,
    pub severity: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

impl RawDesyncAlert {
    /// Create a payload with a fresh ULID and the current time
    pub fn new(severity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            severity: severity.into(),
            message: message.into(),
            scene_name: None,
            source_name: None,
        }
    }

    pub fn with_scene(mut self, scene_name: impl Into<String>) -> Self {
        self.scene_name = Some(scene_name.into());
        self
    }

    pub fn with_source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }
}

/// A normalized desync alert; immutable once stored
///
/// Identity is `id`: two alerts with the same id are the same alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesyncAlert {
    pub id: String,
    pub timestamp: i64,
    pub severity: AlertSeverity,
    pub message: String,
    pub scene_name: Option<String>,
    pub source_name: Option<String>,
}

impl From<RawDesyncAlert> for DesyncAlert {
    fn from(raw: RawDesyncAlert) -> Self {
        Self {
            severity: AlertSeverity::normalize(&raw.severity),
            id: raw.id,
            timestamp: raw.timestamp,
            message: raw.message,
            scene_name: raw.scene_name.filter(|s| !s.is_empty()),
            source_name: raw.source_name.filter(|s| !s.is_empty()),
        }
    }
}
