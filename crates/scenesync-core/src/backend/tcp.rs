//! TCP-based engine backend
//!
//! Provides the connection plumbing of the LAN topology:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  TcpBackend                                                     │
//! │  ├── server: Option<MasterServer>                               │
//! │  │   ├── accept task on 0.0.0.0:<port>                          │
//! │  │   └── peers: live slave sockets (the peer count)             │
//! │  ├── link: Option<MasterLink>                                   │
//! │  │   └── watch task; raises an Error alert if the master drops  │
//! │  ├── targets: last applied SyncTargetSet                        │
//! │  └── alert_tx: broadcast::Sender<RawDesyncAlert>                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Scene payload exchange runs on top of these connections and is not
//! handled here.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AlertSubscription, SyncBackend};
use crate::error::BackendError;
use crate::types::{RawDesyncAlert, SyncTargetSet};

/// Capacity of the desync-alert broadcast channel
const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Back-off after a failed accept, so a persistent error does not spin
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

type PeerSet = Arc<Mutex<HashSet<SocketAddr>>>;

struct MasterServer {
    port: u16,
    peers: PeerSet,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl MasterServer {
    fn stop(self) {
        self.shutdown.cancel();
        self.accept_task.abort();
        self.peers.lock().clear();
    }
}

struct MasterLink {
    addr: String,
    shutdown: CancellationToken,
}

/// Sync engine backend speaking plain TCP on the LAN
pub struct TcpBackend {
    server: Mutex<Option<MasterServer>>,
    link: Mutex<Option<MasterLink>>,
    targets: RwLock<SyncTargetSet>,
    alert_tx: broadcast::Sender<RawDesyncAlert>,
}

impl TcpBackend {
    pub fn new() -> Self {
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            server: Mutex::new(None),
            link: Mutex::new(None),
            targets: RwLock::new(SyncTargetSet::empty()),
            alert_tx,
        }
    }

    /// Port the master server is listening on, if running
    pub fn master_port(&self) -> Option<u16> {
        self.server.lock().as_ref().map(|s| s.port)
    }

    /// Address of the master this node is linked to, if any
    pub fn master_addr(&self) -> Option<String> {
        self.link.lock().as_ref().map(|l| l.addr.clone())
    }

    /// Targets most recently applied through [`SyncBackend::apply_sync_targets`]
    pub fn sync_targets(&self) -> SyncTargetSet {
        self.targets.read().clone()
    }

    /// Publish a desync alert to all subscribers
    ///
    /// Returns the number of subscribers that received it.
    pub fn report_desync(&self, alert: RawDesyncAlert) -> usize {
        debug!(id = %alert.id, severity = %alert.severity, "Publishing desync alert");
        self.alert_tx.send(alert).unwrap_or(0)
    }

    async fn accept_loop(listener: TcpListener, peers: PeerSet, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!(%addr, "Slave connected");
                        peers.lock().insert(addr);
                        tokio::spawn(Self::serve_peer(stream, addr, peers.clone(), shutdown.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept slave connection");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
            }
        }
        debug!("Master accept loop ended");
    }

    /// Hold a slave socket open until it closes or the server stops
    async fn serve_peer(
        mut stream: TcpStream,
        addr: SocketAddr,
        peers: PeerSet,
        shutdown: CancellationToken,
    ) {
        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                read = stream.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(%addr, error = %e, "Slave socket error");
                        break;
                    }
                },
            }
        }
        peers.lock().remove(&addr);
        info!(%addr, "Slave disconnected");
    }

    /// Watch the link to the master; a drop we did not ask for is a desync
    async fn watch_link(
        mut stream: TcpStream,
        addr: String,
        shutdown: CancellationToken,
        alert_tx: broadcast::Sender<RawDesyncAlert>,
    ) {
        let mut buf = [0u8; 1024];
        let lost = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break false,
                read = stream.read(&mut buf) => match read {
                    Ok(0) => break true,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(%addr, error = %e, "Master link error");
                        break true;
                    }
                },
            }
        };

        if lost {
            warn!(%addr, "Lost connection to master");
            let alert = RawDesyncAlert::new("error", format!("Lost connection to master at {}", addr));
            let _ = alert_tx.send(alert);
        }
    }
}

impl Default for TcpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TcpBackend {
    fn drop(&mut self) {
        if let Some(server) = self.server.get_mut().take() {
            server.stop();
        }
        if let Some(link) = self.link.get_mut().take() {
            link.shutdown.cancel();
        }
    }
}

#[async_trait]
impl SyncBackend for TcpBackend {
    async fn start_master_server(&self, port: u16) -> Result<(), BackendError> {
        if self.server.lock().is_some() {
            return Err(BackendError::new("master server already running"));
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BackendError::new(format!("failed to bind {}: {}", addr, e)))?;

        let mut server = self.server.lock();
        if server.is_some() {
            return Err(BackendError::new("master server already running"));
        }

        let peers: PeerSet = Arc::new(Mutex::new(HashSet::new()));
        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(Self::accept_loop(listener, peers.clone(), shutdown.clone()));

        *server = Some(MasterServer {
            port,
            peers,
            shutdown,
            accept_task,
        });
        info!(port, "Master server listening");
        Ok(())
    }

    async fn stop_master_server(&self) -> Result<(), BackendError> {
        let server = self.server.lock().take();
        match server {
            Some(server) => {
                let port = server.port;
                server.stop();
                info!(port, "Master server stopped");
            }
            None => debug!("Master server not running"),
        }
        Ok(())
    }

    async fn connect_to_master(&self, host: &str, port: u16) -> Result<(), BackendError> {
        if self.link.lock().is_some() {
            return Err(BackendError::new("already connected to a master"));
        }

        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| BackendError::new(format!("failed to connect to {}: {}", addr, e)))?;

        let mut link = self.link.lock();
        if link.is_some() {
            return Err(BackendError::new("already connected to a master"));
        }

        let shutdown = CancellationToken::new();
        tokio::spawn(Self::watch_link(
            stream,
            addr.clone(),
            shutdown.clone(),
            self.alert_tx.clone(),
        ));

        info!(%addr, "Connected to master");
        *link = Some(MasterLink { addr, shutdown });
        Ok(())
    }

    async fn disconnect_from_master(&self) -> Result<(), BackendError> {
        let link = self.link.lock().take();
        match link {
            Some(link) => {
                link.shutdown.cancel();
                info!(addr = %link.addr, "Disconnected from master");
            }
            None => debug!("Not connected to a master"),
        }
        Ok(())
    }

    async fn connected_clients_count(&self) -> Result<usize, BackendError> {
        self.server
            .lock()
            .as_ref()
            .map(|s| s.peers.lock().len())
            .ok_or_else(|| BackendError::new("master server is not running"))
    }

    async fn apply_sync_targets(&self, targets: &SyncTargetSet) -> Result<(), BackendError> {
        info!(%targets, "Applying sync targets");
        *self.targets.write() = targets.clone();
        Ok(())
    }

    async fn subscribe_alerts(&self) -> Result<AlertSubscription, BackendError> {
        Ok(AlertSubscription::new(self.alert_tx.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncTarget;

    #[tokio::test]
    async fn test_count_fails_when_not_serving() {
        let backend = TcpBackend::new();
        let err = backend.connected_clients_count().await.unwrap_err();
        assert_eq!(err.message(), "master server is not running");
    }

    #[tokio::test]
    async fn test_stop_and_disconnect_are_idempotent() {
        let backend = TcpBackend::new();
        assert!(backend.stop_master_server().await.is_ok());
        assert!(backend.stop_master_server().await.is_ok());
        assert!(backend.disconnect_from_master().await.is_ok());
        assert!(backend.disconnect_from_master().await.is_ok());
    }

    #[tokio::test]
    async fn test_apply_sync_targets_records_set() {
        let backend = TcpBackend::new();
        let targets: SyncTargetSet = [SyncTarget::Preview].into_iter().collect();
        backend.apply_sync_targets(&targets).await.unwrap();
        assert_eq!(backend.sync_targets(), targets);
    }

    #[tokio::test]
    async fn test_report_desync_reaches_subscribers() {
        let backend = TcpBackend::new();
        assert_eq!(backend.report_desync(RawDesyncAlert::new("warning", "nobody")), 0);

        let mut sub = backend.subscribe_alerts().await.unwrap();
        assert_eq!(backend.report_desync(RawDesyncAlert::new("warning", "drift")), 1);
        assert_eq!(sub.recv().await.unwrap().message, "drift");
    }
}
