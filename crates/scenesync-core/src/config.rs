//! Coordinator configuration
//!
//! Loaded from an optional JSON file; every field has a default so an
//! empty object (or no file at all) yields a working configuration.
//!
//! ```json
//! {
//!   "pollIntervalMs": 1000,
//!   "alertCapacity": 50,
//!   "defaultTargets": ["program", "source"],
//!   "eventChannelCapacity": 256,
//!   "masterPort": 8080,
//!   "masterHost": "localhost"
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::types::{validate_port, SyncTargetSet, DEFAULT_MASTER_PORT};

/// Default interval between connected-client count refreshes
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default maximum number of desync alerts retained
pub const DEFAULT_ALERT_CAPACITY: usize = 50;

/// Default capacity for the session event broadcast channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for a [`SyncSession`](crate::SyncSession)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorConfig {
    /// Peer count refresh interval while serving as Master
    pub poll_interval_ms: u64,
    /// Maximum alerts retained; the oldest arrival is evicted beyond this
    pub alert_capacity: usize,
    /// Sync targets selected when the session starts
    pub default_targets: SyncTargetSet,
    /// Buffer size of the session event channel
    pub event_channel_capacity: usize,
    /// Port used by `master` when none is given
    pub master_port: u16,
    /// Host used by `slave` when none is given
    pub master_host: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            alert_capacity: DEFAULT_ALERT_CAPACITY,
            default_targets: SyncTargetSet::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            master_port: DEFAULT_MASTER_PORT,
            master_host: "localhost".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading coordinator config");
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the coordinator relies on
    pub fn validate(&self) -> SyncResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(SyncError::Config("pollIntervalMs must be greater than 0".into()));
        }
        if self.alert_capacity == 0 {
            return Err(SyncError::Config("alertCapacity must be greater than 0".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(SyncError::Config(
                "eventChannelCapacity must be greater than 0".into(),
            ));
        }
        if self.master_host.trim().is_empty() {
            return Err(SyncError::Config("masterHost must not be empty".into()));
        }
        validate_port(self.master_port)
            .map_err(|e| SyncError::Config(format!("masterPort: {}", e)))?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncTarget;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.alert_capacity, 50);
        assert_eq!(config.default_targets, SyncTargetSet::default());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"alertCapacity": 10, "defaultTargets": ["preview"]}"#).unwrap();
        assert_eq!(config.alert_capacity, 10);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert!(config.default_targets.contains(SyncTarget::Preview));
        assert_eq!(config.default_targets.len(), 1);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = CoordinatorConfig {
            alert_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_privileged_port() {
        let config = CoordinatorConfig {
            master_port: 80,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("masterPort"));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scenesync.json");
        std::fs::write(&path, r#"{"masterPort": 9000, "masterHost": "10.0.0.2"}"#).unwrap();

        let config = CoordinatorConfig::load(&path).unwrap();
        assert_eq!(config.master_port, 9000);
        assert_eq!(config.master_host, "10.0.0.2");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scenesync.json");
        std::fs::write(&path, r#"{"pollIntervalMs": 0}"#).unwrap();
        assert!(matches!(CoordinatorConfig::load(&path), Err(SyncError::Config(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            CoordinatorConfig::load(&path),
            Err(SyncError::Serialization(_))
        ));

        let missing = temp.path().join("missing.json");
        assert!(matches!(CoordinatorConfig::load(&missing), Err(SyncError::Io(_))));
    }
}
