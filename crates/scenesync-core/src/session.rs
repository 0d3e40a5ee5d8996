//! SyncSession - the primary entry point for a coordinator
//!
//! A session owns:
//! - the optional network role and its [`RoleConnectionController`]
//! - the [`AlertBuffer`], fed from the engine's alert channel for the whole
//!   session lifetime, independently of the connection state
//! - the [`SyncTargetConfigurator`]
//! - the [`SessionEvent`] bus observers subscribe to
//!
//! # Example
//!
//! ```ignore
//! use scenesync_core::{CoordinatorConfig, NetworkRole, SyncSession, TcpBackend};
//!
//! let session = SyncSession::new(Arc::new(TcpBackend::new()), CoordinatorConfig::default())?;
//! let mut events = session.subscribe();
//!
//! session.select_role(NetworkRole::Master)?;
//! session.start_as_master(8080).await?;
//! ```

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::backend::SyncBackend;
use crate::config::CoordinatorConfig;
use crate::error::{SyncError, SyncResult};
use crate::sync::{
    AlertBuffer, AlertCounts, AlertFeed, AlertFilterView, ApplyStatus, ConnectionState,
    RoleConnectionController, SessionEvent, SyncTargetConfigurator,
};
use crate::types::{DesyncAlert, NetworkRole, SyncTarget, SyncTargetSet};

/// Serializable summary of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub role: Option<NetworkRole>,
    pub status: ConnectionState,
    pub targets: SyncTargetSet,
    pub target_status: ApplyStatus,
    pub alerts: AlertCounts,
}

pub struct SyncSession {
    config: CoordinatorConfig,
    backend: Arc<dyn SyncBackend>,
    event_tx: broadcast::Sender<SessionEvent>,
    controller: RwLock<Option<Arc<RoleConnectionController>>>,
    alerts: Arc<AlertBuffer>,
    feed: Mutex<Option<AlertFeed>>,
    targets: SyncTargetConfigurator,
}

impl SyncSession {
    /// Create a session and subscribe to the engine's alert channel
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn SyncBackend>, config: CoordinatorConfig) -> SyncResult<Self> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let alerts = Arc::new(AlertBuffer::new(config.alert_capacity, event_tx.clone()));
        let feed = AlertFeed::attach(alerts.clone(), backend.clone());
        let targets = SyncTargetConfigurator::new(
            backend.clone(),
            config.default_targets.clone(),
            event_tx.clone(),
        );

        debug!(
            alert_capacity = config.alert_capacity,
            poll_interval_ms = config.poll_interval_ms,
            "Sync session created"
        );
        Ok(Self {
            config,
            backend,
            event_tx,
            controller: RwLock::new(None),
            alerts,
            feed: Mutex::new(Some(feed)),
            targets,
        })
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Choose the network role for this session
    ///
    /// A role can only be chosen once; [`reset`](Self::reset) returns the
    /// session to "no role selected".
    pub fn select_role(&self, role: NetworkRole) -> SyncResult<Arc<RoleConnectionController>> {
        let mut slot = self.controller.write();
        if let Some(existing) = slot.as_ref() {
            return Err(SyncError::RoleAlreadySelected(existing.role()));
        }

        let controller = Arc::new(RoleConnectionController::new(
            role,
            self.backend.clone(),
            self.config.poll_interval(),
            self.event_tx.clone(),
        ));
        *slot = Some(controller.clone());

        info!(%role, "Network role selected");
        let _ = self.event_tx.send(SessionEvent::RoleSelected { role });
        Ok(controller)
    }

    pub fn role(&self) -> Option<NetworkRole> {
        self.controller.read().as_ref().map(|c| c.role())
    }

    pub fn controller(&self) -> SyncResult<Arc<RoleConnectionController>> {
        self.controller
            .read()
            .clone()
            .ok_or(SyncError::NoRoleSelected)
    }

    /// Connection state; Disconnected while no role is selected
    pub fn status(&self) -> ConnectionState {
        self.controller
            .read()
            .as_ref()
            .map(|c| c.status())
            .unwrap_or_default()
    }

    pub async fn start_as_master(&self, port: u16) -> SyncResult<()> {
        self.controller()?.start_as_master(port).await
    }

    pub async fn stop_as_master(&self) -> SyncResult<()> {
        self.controller()?.stop_as_master().await
    }

    pub async fn connect_as_slave(&self, host: &str, port: u16) -> SyncResult<()> {
        self.controller()?.connect_as_slave(host, port).await
    }

    pub async fn disconnect_as_slave(&self) -> SyncResult<()> {
        self.controller()?.disconnect_as_slave().await
    }

    /// Tear down the active role and return to "no role selected"
    ///
    /// The controller is retired first, so handles obtained from
    /// [`select_role`](Self::select_role) stop working. The engine
    /// stop/disconnect is best-effort: failures are logged and the role is
    /// cleared anyway. Alerts and sync targets are kept.
    pub async fn reset(&self) {
        let Some(controller) = self.controller.read().clone() else {
            return;
        };
        controller.retire();
        controller.teardown().await;

        let cleared = {
            let mut slot = self.controller.write();
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, &controller) => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };
        if cleared {
            info!(role = %controller.role(), "Session reset");
            let _ = self.event_tx.send(SessionEvent::RoleCleared);
        }
    }

    /// Reset the role and release the alert subscription
    pub async fn shutdown(&self) {
        self.reset().await;
        let feed = self.feed.lock().take();
        if let Some(mut feed) = feed {
            feed.close().await;
        }
        debug!("Sync session shut down");
    }

    pub fn alerts(&self) -> &Arc<AlertBuffer> {
        &self.alerts
    }

    /// Alerts projected through `view`
    pub fn alert_view(&self, view: &AlertFilterView) -> Vec<DesyncAlert> {
        self.alerts.view(view)
    }

    pub fn clear_alert(&self, id: &str) -> bool {
        self.alerts.clear_one(id)
    }

    pub fn clear_all_alerts(&self) -> usize {
        self.alerts.clear_all()
    }

    pub fn targets(&self) -> &SyncTargetConfigurator {
        &self.targets
    }

    pub async fn toggle_target(&self, target: SyncTarget) -> SyncResult<SyncTargetSet> {
        self.targets.toggle(target).await
    }

    pub async fn retry_targets(&self) -> SyncResult<SyncTargetSet> {
        self.targets.retry().await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            role: self.role(),
            status: self.status(),
            targets: self.targets.targets(),
            target_status: self.targets.status(),
            alerts: self.alerts.counts(),
        }
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("role", &self.role())
            .field("status", &self.status())
            .field("alerts", &self.alerts.len())
            .finish()
    }
}
