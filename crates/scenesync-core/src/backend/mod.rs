//! Boundary to the sync engine
//!
//! The coordinator never talks to the network or the production tool
//! directly. Every lifecycle command, the peer count query, target
//! configuration and the desync-alert push channel go through a
//! [`SyncBackend`].
//!
//! ## Implementations
//!
//! - [`TcpBackend`]: master listens on a TCP port and counts attached
//!   slaves; slave holds one connection to the master.
//! - [`ScriptedBackend`](crate::testing::ScriptedBackend): in-memory engine
//!   with scripted failures and delays, for tests.

pub mod tcp;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::BackendError;
use crate::types::{RawDesyncAlert, SyncTargetSet};

pub use tcp::TcpBackend;

/// Commands and events consumed from the sync engine
///
/// Every command may fail with a [`BackendError`] carrying the engine's
/// message. Implementations must be safe to call from several tasks.
#[async_trait]
pub trait SyncBackend: Send + Sync + 'static {
    /// Start serving as Master on `port`
    async fn start_master_server(&self, port: u16) -> Result<(), BackendError>;

    /// Stop the Master server
    async fn stop_master_server(&self) -> Result<(), BackendError>;

    /// Connect to a Master as Slave
    async fn connect_to_master(&self, host: &str, port: u16) -> Result<(), BackendError>;

    /// Drop the connection to the Master
    async fn disconnect_from_master(&self) -> Result<(), BackendError>;

    /// Number of Slaves currently attached to this Master
    async fn connected_clients_count(&self) -> Result<usize, BackendError>;

    /// Replace the set of categories participating in sync
    async fn apply_sync_targets(&self, targets: &SyncTargetSet) -> Result<(), BackendError>;

    /// Subscribe to the `desync-alert` push channel
    async fn subscribe_alerts(&self) -> Result<AlertSubscription, BackendError>;
}

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// Live subscription to the engine's desync-alert channel
///
/// Delivery is best-effort: if the receiver falls behind, skipped alerts
/// are logged and lost. Dropping the subscription unsubscribes.
pub struct AlertSubscription {
    receiver: broadcast::Receiver<RawDesyncAlert>,
    release: Option<ReleaseHook>,
}

impl AlertSubscription {
    pub fn new(receiver: broadcast::Receiver<RawDesyncAlert>) -> Self {
        Self {
            receiver,
            release: None,
        }
    }

    /// Run `hook` once when the subscription is released
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    /// Wait for the next alert; `None` once the engine closes the channel
    pub async fn recv(&mut self) -> Option<RawDesyncAlert> {
        loop {
            match self.receiver.recv().await {
                Ok(alert) => return Some(alert),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Alert subscription lagged, alerts dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Cancel the subscription
    pub fn unsubscribe(self) {
        debug!("Unsubscribing from desync alerts");
        drop(self);
    }
}

impl Drop for AlertSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for AlertSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSubscription")
            .field("has_release_hook", &self.release.is_some())
            .finish()
    }
}
