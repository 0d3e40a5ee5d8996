//! Network role lifecycle state machine
//!
//! ```text
//!                 start / connect
//!  Disconnected ─────────────────▶ Connecting ──success──▶ Connected
//!       ▲                              │                       │
//!       │                           failure                    │
//!       │                              ▼                       │
//!       └────── stop / disconnect ── Error ◀───────────────────┘
//!                 (from any state)          stop / disconnect
//! ```
//!
//! Every start/connect opens a new lifecycle epoch and every
//! stop/disconnect closes it as soon as it is issued, before the engine
//! answers. Results are only applied to the epoch that issued them, so a
//! late start result or a late peer count can never resurrect a session the
//! user already tore down.
//!
//! A session reset retires the controller for good: every later command on
//! it fails with [`SyncError::Retired`], so a stale handle cannot run one
//! role's flow next to the role that replaced it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{ConnectionState, SessionEvent};
use super::poller::ClientCountPoller;
use crate::backend::SyncBackend;
use crate::error::{BackendError, LifecycleOp, SyncError, SyncResult};
use crate::types::{validate_port, NetworkRole};

struct StatusInner {
    state: ConnectionState,
    epoch: u64,
    /// Epoch opened by the most recent start/connect
    opened: u64,
    /// Engine undo of a superseded start/connect in flight
    undoing: bool,
    retired: bool,
}

/// Exclusively-owned connection state of one controller
///
/// Mutations run under a short synchronous lock that is never held across
/// an `.await`, and emit `StatusChanged` only on actual change.
pub(crate) struct StatusCell {
    role: NetworkRole,
    inner: RwLock<StatusInner>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl StatusCell {
    pub(crate) fn new(role: NetworkRole, event_tx: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            role,
            inner: RwLock::new(StatusInner {
                state: ConnectionState::Disconnected,
                epoch: 0,
                opened: 0,
                undoing: false,
                retired: false,
            }),
            event_tx,
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        self.inner.read().state.clone()
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.inner.read().retired
    }

    /// Disconnected -> Connecting, opening a new epoch
    pub(crate) fn begin(&self, op: LifecycleOp) -> SyncResult<u64> {
        let mut inner = self.inner.write();
        if inner.retired {
            return Err(SyncError::Retired(op));
        }
        if inner.undoing {
            return Err(SyncError::InvalidTransition {
                op,
                state: "undoing a superseded command".to_string(),
            });
        }
        if !inner.state.is_disconnected() {
            return Err(SyncError::InvalidTransition {
                op,
                state: inner.state.to_string(),
            });
        }
        inner.epoch += 1;
        inner.opened = inner.epoch;
        let epoch = inner.epoch;
        self.transition(&mut inner, ConnectionState::Connecting);
        Ok(epoch)
    }

    /// Settle an in-flight start/connect of `epoch`
    ///
    /// `on_settled` runs under the same lock, so whatever it arms cannot
    /// interleave with a concurrent reset. Returns `false` if the epoch was
    /// superseded; nothing changes in that case.
    pub(crate) fn complete_with(
        &self,
        epoch: u64,
        next: ConnectionState,
        on_settled: impl FnOnce(),
    ) -> bool {
        let mut inner = self.inner.write();
        if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
            return false;
        }
        self.transition(&mut inner, next);
        on_settled();
        true
    }

    pub(crate) fn complete(&self, epoch: u64, next: ConnectionState) -> bool {
        self.complete_with(epoch, next, || {})
    }

    /// Close the current epoch ahead of an engine stop/disconnect
    ///
    /// The state is left alone until the engine answers; a start/connect
    /// settling in between is superseded and arms nothing.
    pub(crate) fn begin_teardown(&self, on_closed: impl FnOnce()) {
        let mut inner = self.inner.write();
        inner.epoch += 1;
        on_closed();
    }

    /// Refuse every later start/connect. Returns `false` if already retired.
    pub(crate) fn retire_with(&self, on_retired: impl FnOnce()) -> bool {
        let mut inner = self.inner.write();
        if inner.retired {
            return false;
        }
        inner.retired = true;
        inner.epoch += 1;
        on_retired();
        true
    }

    /// Claim the engine undo for a superseded `epoch`
    ///
    /// Fails once a newer start/connect has been opened. While claimed, new
    /// start/connect commands are refused until [`finish_undo`](Self::finish_undo).
    pub(crate) fn claim_undo(&self, epoch: u64) -> bool {
        let mut inner = self.inner.write();
        if inner.opened != epoch || inner.undoing {
            return false;
        }
        inner.undoing = true;
        true
    }

    pub(crate) fn finish_undo(&self) {
        self.inner.write().undoing = false;
    }

    /// Any state -> Disconnected, closing the current epoch
    pub(crate) fn reset_with(&self, on_reset: impl FnOnce()) {
        let mut inner = self.inner.write();
        inner.epoch += 1;
        self.transition(&mut inner, ConnectionState::Disconnected);
        on_reset();
    }

    /// Record a fresh peer count if `epoch` is still Connected as Master
    pub(crate) fn apply_peer_count(&self, epoch: u64, count: usize) -> bool {
        let mut inner = self.inner.write();
        if inner.epoch != epoch {
            return false;
        }
        match inner.state {
            ConnectionState::Connected { peer_count: Some(_) } => {
                self.transition(
                    &mut inner,
                    ConnectionState::Connected {
                        peer_count: Some(count),
                    },
                );
                true
            }
            _ => false,
        }
    }

    fn transition(&self, inner: &mut StatusInner, next: ConnectionState) {
        if inner.state == next {
            return;
        }
        debug!(role = %self.role, from = %inner.state, to = %next, "Connection state changed");
        inner.state = next.clone();
        let _ = self.event_tx.send(SessionEvent::StatusChanged {
            role: self.role,
            status: next,
        });
    }
}

/// Owner of the single active network role and its connection lifecycle
///
/// Created for one role; issuing the other role's commands fails with
/// [`SyncError::WrongRole`]. Switching roles takes a full session reset.
pub struct RoleConnectionController {
    role: NetworkRole,
    backend: Arc<dyn SyncBackend>,
    status: Arc<StatusCell>,
    poller: ClientCountPoller,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl RoleConnectionController {
    pub fn new(
        role: NetworkRole,
        backend: Arc<dyn SyncBackend>,
        poll_interval: Duration,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let status = Arc::new(StatusCell::new(role, event_tx.clone()));
        let poller = ClientCountPoller::new(backend.clone(), status.clone(), poll_interval);
        Self {
            role,
            backend,
            status,
            poller,
            event_tx,
        }
    }

    pub fn role(&self) -> NetworkRole {
        self.role
    }

    pub fn status(&self) -> ConnectionState {
        self.status.get()
    }

    /// Whether the peer count poller is running
    pub fn is_polling(&self) -> bool {
        self.poller.is_armed()
    }

    /// Start serving as Master on `port`
    ///
    /// Valid only from Disconnected. On success the state is Connected
    /// with a peer count of 0 before the poller is armed. On failure the
    /// state becomes Error with the engine's message and the error is
    /// returned to the caller; there is no retry.
    pub async fn start_as_master(&self, port: u16) -> SyncResult<()> {
        let op = LifecycleOp::StartMaster;
        self.ensure_active(op)?;
        validate_port(port)?;
        let epoch = self.status.begin(op)?;

        info!(port, "Starting master server");
        match self.backend.start_master_server(port).await {
            Ok(()) => {
                let connected = ConnectionState::Connected {
                    peer_count: Some(0),
                };
                if !self
                    .status
                    .complete_with(epoch, connected, || self.poller.arm(epoch))
                {
                    return self.discard_late_success(op, epoch).await;
                }
                info!(port, "Master server started");
                Ok(())
            }
            Err(source) => self.fail_connecting(epoch, op, source),
        }
    }

    /// Stop serving as Master
    ///
    /// Always ends in Disconnected, whatever state it was issued from; an
    /// engine failure is still returned after the local reset. The poller
    /// is disarmed before the engine is asked to stop.
    pub async fn stop_as_master(&self) -> SyncResult<()> {
        let op = LifecycleOp::StopMaster;
        self.ensure_active(op)?;
        self.close(op).await
    }

    /// Connect to a Master as Slave
    ///
    /// Valid only from Disconnected. Connected carries no peer count for
    /// Slaves.
    pub async fn connect_as_slave(&self, host: &str, port: u16) -> SyncResult<()> {
        let op = LifecycleOp::ConnectSlave;
        self.ensure_active(op)?;
        let host = host.trim();
        if host.is_empty() {
            return Err(SyncError::InvalidHost(host.to_string()));
        }
        validate_port(port)?;
        let epoch = self.status.begin(op)?;

        info!(host, port, "Connecting to master");
        match self.backend.connect_to_master(host, port).await {
            Ok(()) => {
                if !self
                    .status
                    .complete(epoch, ConnectionState::Connected { peer_count: None })
                {
                    return self.discard_late_success(op, epoch).await;
                }
                info!(host, port, "Connected to master");
                Ok(())
            }
            Err(source) => self.fail_connecting(epoch, op, source),
        }
    }

    /// Disconnect from the Master
    ///
    /// Always ends in Disconnected; an engine failure is returned after the
    /// local reset.
    pub async fn disconnect_as_slave(&self) -> SyncResult<()> {
        let op = LifecycleOp::DisconnectSlave;
        self.ensure_active(op)?;
        self.close(op).await
    }

    /// Whether a session reset has retired this controller
    pub fn is_retired(&self) -> bool {
        self.status.is_retired()
    }

    /// Refuse all further commands on this controller
    ///
    /// An in-flight start/connect is superseded. Call [`teardown`](Self::teardown)
    /// afterwards to release the engine side.
    pub fn retire(&self) {
        if self.status.retire_with(|| {
            self.poller.disarm();
        }) {
            debug!(role = %self.role, "Connection controller retired");
        }
    }

    /// Best-effort stop/disconnect used by session reset and shutdown
    ///
    /// Runs on retired controllers too. Engine failures are logged, never
    /// returned.
    pub async fn teardown(&self) {
        if self.status().is_disconnected() {
            self.poller.disarm();
            return;
        }

        let op = match self.role {
            NetworkRole::Master => LifecycleOp::StopMaster,
            NetworkRole::Slave => LifecycleOp::DisconnectSlave,
        };
        if let Err(e) = self.close(op).await {
            warn!(role = %self.role, error = %e, "Teardown failed, continuing with local reset");
        }
    }

    async fn close(&self, op: LifecycleOp) -> SyncResult<()> {
        self.status.begin_teardown(|| {
            self.poller.disarm();
        });

        let result = match op {
            LifecycleOp::StopMaster => {
                info!("Stopping master server");
                self.backend.stop_master_server().await
            }
            _ => {
                info!("Disconnecting from master");
                self.backend.disconnect_from_master().await
            }
        };
        self.status.reset_with(|| {
            self.poller.disarm();
        });
        self.settle_teardown(op, result)
    }

    fn ensure_active(&self, op: LifecycleOp) -> SyncResult<()> {
        if op.role() != self.role {
            return Err(SyncError::WrongRole {
                op,
                role: self.role,
            });
        }
        if self.status.is_retired() {
            return Err(SyncError::Retired(op));
        }
        Ok(())
    }

    fn fail_connecting(&self, epoch: u64, op: LifecycleOp, source: BackendError) -> SyncResult<()> {
        let message = source.message().to_string();
        let failed = ConnectionState::Error {
            last_error: message.clone(),
        };
        if self.status.complete(epoch, failed) {
            warn!(%op, error = %message, "Lifecycle command failed");
        } else {
            debug!(%op, error = %message, "Superseded lifecycle command failed");
        }
        self.notify_failure(op, &message);
        Err(SyncError::Lifecycle { op, source })
    }

    /// A start/connect of `epoch` succeeded after a stop/disconnect already won
    ///
    /// The engine side is undone unless a newer start/connect owns it by now.
    async fn discard_late_success(&self, op: LifecycleOp, epoch: u64) -> SyncResult<()> {
        warn!(%op, "Lifecycle command completed after being superseded");
        if !self.status.claim_undo(epoch) {
            debug!(%op, epoch, "Newer lifecycle command owns the engine, skipping undo");
            return Err(SyncError::Superseded(op));
        }

        let undo = match self.role {
            NetworkRole::Master => self.backend.stop_master_server().await,
            NetworkRole::Slave => self.backend.disconnect_from_master().await,
        };
        self.status.finish_undo();
        if let Err(e) = undo {
            warn!(%op, error = %e, "Failed to undo superseded lifecycle command");
        }
        Err(SyncError::Superseded(op))
    }

    fn settle_teardown(&self, op: LifecycleOp, result: Result<(), BackendError>) -> SyncResult<()> {
        match result {
            Ok(()) => {
                info!(%op, "Lifecycle command completed");
                Ok(())
            }
            Err(source) => {
                warn!(%op, error = %source, "Lifecycle command failed, state reset anyway");
                self.notify_failure(op, source.message());
                Err(SyncError::Lifecycle { op, source })
            }
        }
    }

    fn notify_failure(&self, op: LifecycleOp, message: &str) {
        let _ = self.event_tx.send(SessionEvent::LifecycleFailed {
            role: self.role,
            op,
            message: message.to_string(),
        });
    }
}

impl std::fmt::Debug for RoleConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleConnectionController")
            .field("role", &self.role)
            .field("status", &self.status())
            .field("polling", &self.is_polling())
            .finish()
    }
}
