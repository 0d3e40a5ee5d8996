//! Periodic connected-client count refresh for the Master role
//!
//! Armed by the connection controller once a master server is up, with the
//! lifecycle epoch of that server. Each tick asks the engine for the peer
//! count; results land through [`StatusCell::apply_peer_count`], which
//! drops them unless the same master session is still Connected.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::connection::StatusCell;
use crate::backend::SyncBackend;

/// Repeating peer count refresh owned by one controller
pub struct ClientCountPoller {
    backend: Arc<dyn SyncBackend>,
    status: Arc<StatusCell>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientCountPoller {
    pub(crate) fn new(backend: Arc<dyn SyncBackend>, status: Arc<StatusCell>, interval: Duration) -> Self {
        Self {
            backend,
            status,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Start polling for the master session identified by `epoch`
    ///
    /// The first refresh is issued immediately. Re-arming replaces any
    /// previous timer.
    pub fn arm(&self, epoch: u64) {
        let backend = self.backend.clone();
        let status = self.status.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match backend.connected_clients_count().await {
                    Ok(count) => {
                        if !status.apply_peer_count(epoch, count) {
                            debug!(epoch, count, "Discarding stale client count");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to refresh connected client count");
                    }
                }
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        debug!(epoch, interval_ms = period.as_millis() as u64, "Client count poller armed");
    }

    /// Cancel the timer; safe to call when never armed or already disarmed
    ///
    /// Returns `true` if a running timer was cancelled.
    pub fn disarm(&self) -> bool {
        match self.task.lock().take() {
            Some(handle) => {
                handle.abort();
                debug!("Client count poller disarmed");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ClientCountPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
