//! Local sync target selection
//!
//! Toggles apply to local state immediately and are then pushed to the
//! engine as the full set. A failed push does not roll the toggle back:
//! the status becomes [`ApplyStatus::Failed`], the toggle returns
//! [`SyncError::ApplyTargets`] and [`SyncTargetConfigurator::retry`]
//! re-sends the current set.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::SessionEvent;
use crate::backend::SyncBackend;
use crate::error::{SyncError, SyncResult};
use crate::types::{SyncTarget, SyncTargetSet};

/// Whether the local selection has reached the engine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "camelCase")]
pub enum ApplyStatus {
    /// Nothing pushed yet this session
    #[default]
    NotApplied,
    Pending,
    Applied,
    Failed(String),
}

impl ApplyStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ApplyStatus::Failed(_))
    }
}

impl fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyStatus::NotApplied => write!(f, "not applied"),
            ApplyStatus::Pending => write!(f, "pending"),
            ApplyStatus::Applied => write!(f, "applied"),
            ApplyStatus::Failed(message) => write!(f, "failed: {}", message),
        }
    }
}

struct TargetState {
    targets: SyncTargetSet,
    status: ApplyStatus,
    /// Bumped per push; only the newest push may settle the status
    revision: u64,
}

pub struct SyncTargetConfigurator {
    backend: Arc<dyn SyncBackend>,
    state: RwLock<TargetState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SyncTargetConfigurator {
    pub fn new(
        backend: Arc<dyn SyncBackend>,
        defaults: SyncTargetSet,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            backend,
            state: RwLock::new(TargetState {
                targets: defaults,
                status: ApplyStatus::NotApplied,
                revision: 0,
            }),
            event_tx,
        }
    }

    pub fn targets(&self) -> SyncTargetSet {
        self.state.read().targets.clone()
    }

    pub fn status(&self) -> ApplyStatus {
        self.state.read().status.clone()
    }

    pub fn is_selected(&self, target: SyncTarget) -> bool {
        self.state.read().targets.contains(target)
    }

    /// Flip `target` locally, then push the full set to the engine
    ///
    /// Returns the set that was pushed. On failure the local flip stays.
    pub async fn toggle(&self, target: SyncTarget) -> SyncResult<SyncTargetSet> {
        let (targets, revision) = self.begin_push(|targets| {
            let selected = targets.toggle(target);
            debug!(%target, selected, "Sync target toggled");
        });
        self.push(targets, revision).await
    }

    /// Push the current set again, typically after a failure
    pub async fn retry(&self) -> SyncResult<SyncTargetSet> {
        let (targets, revision) = self.begin_push(|_| {});
        self.push(targets, revision).await
    }

    fn begin_push(&self, mutate: impl FnOnce(&mut SyncTargetSet)) -> (SyncTargetSet, u64) {
        let mut state = self.state.write();
        mutate(&mut state.targets);
        state.revision += 1;
        state.status = ApplyStatus::Pending;
        self.notify(&state);
        (state.targets.clone(), state.revision)
    }

    async fn push(&self, targets: SyncTargetSet, revision: u64) -> SyncResult<SyncTargetSet> {
        let result = self.backend.apply_sync_targets(&targets).await;

        {
            let mut state = self.state.write();
            if state.revision == revision {
                state.status = match &result {
                    Ok(()) => ApplyStatus::Applied,
                    Err(e) => ApplyStatus::Failed(e.message().to_string()),
                };
                self.notify(&state);
            } else {
                debug!(revision, latest = state.revision, "Superseded sync target push settled");
            }
        }

        match result {
            Ok(()) => {
                info!(%targets, "Sync targets applied");
                Ok(targets)
            }
            Err(e) => {
                warn!(%targets, error = %e, "Failed to apply sync targets, local selection kept");
                Err(SyncError::ApplyTargets(e))
            }
        }
    }

    fn notify(&self, state: &TargetState) {
        let _ = self.event_tx.send(SessionEvent::TargetsChanged {
            targets: state.targets.clone(),
            status: state.status.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BackendCall, BackendCommand, ScriptedBackend};
    use std::time::Duration;

    fn configurator() -> (Arc<ScriptedBackend>, Arc<SyncTargetConfigurator>) {
        let backend = Arc::new(ScriptedBackend::new());
        let (event_tx, _) = broadcast::channel(64);
        let configurator =
            SyncTargetConfigurator::new(backend.clone(), SyncTargetSet::default(), event_tx);
        (backend, Arc::new(configurator))
    }

    #[tokio::test]
    async fn test_toggle_on_then_off_restores_default() {
        let (backend, configurator) = configurator();

        let with_preview = configurator.toggle(SyncTarget::Preview).await.unwrap();
        assert!(with_preview.contains(SyncTarget::Preview));
        let back = configurator.toggle(SyncTarget::Preview).await.unwrap();
        assert_eq!(back, SyncTargetSet::default());

        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::ApplySyncTargets(with_preview),
                BackendCall::ApplySyncTargets(SyncTargetSet::default()),
            ]
        );
        assert_eq!(configurator.status(), ApplyStatus::Applied);
    }

    #[tokio::test]
    async fn test_failed_apply_keeps_local_toggle() {
        let (backend, configurator) = configurator();
        backend.fail_next(BackendCommand::ApplySyncTargets, "engine offline");

        let err = configurator.toggle(SyncTarget::Source).await.unwrap_err();
        assert!(matches!(err, SyncError::ApplyTargets(_)));
        assert!(!configurator.is_selected(SyncTarget::Source));
        assert_eq!(configurator.status(), ApplyStatus::Failed("engine offline".into()));

        let pushed = configurator.retry().await.unwrap();
        assert!(!pushed.contains(SyncTarget::Source));
        assert_eq!(configurator.status(), ApplyStatus::Applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_newest_push_settles_status() {
        let (backend, configurator) = configurator();
        backend.set_delay(BackendCommand::ApplySyncTargets, Duration::from_millis(100));
        backend.fail_next(BackendCommand::ApplySyncTargets, "slow failure");

        let first = {
            let configurator = configurator.clone();
            tokio::spawn(async move { configurator.toggle(SyncTarget::Preview).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(configurator.status(), ApplyStatus::Pending);

        backend.set_delay(BackendCommand::ApplySyncTargets, Duration::from_millis(500));
        let second = {
            let configurator = configurator.clone();
            tokio::spawn(async move { configurator.toggle(SyncTarget::Program).await })
        };

        assert!(first.await.unwrap().is_err());
        assert_eq!(configurator.status(), ApplyStatus::Pending);
        assert!(second.await.unwrap().is_ok());
        assert_eq!(configurator.status(), ApplyStatus::Applied);
    }
}
