//! Scripted in-memory engine for tests and demos
//!
//! [`ScriptedBackend`] records every command in order, fails commands on
//! demand, delays them via `tokio::time` (so paused-clock tests stay
//! deterministic) and lets the caller push desync alerts.
//!
//! ```ignore
//! let backend = Arc::new(ScriptedBackend::new());
//! backend.fail_next(BackendCommand::StartMasterServer, "port in use");
//! backend.set_delay(BackendCommand::ConnectedClientsCount, Duration::from_millis(500));
//! backend.push_alert(RawDesyncAlert::new("warning", "Transform mismatch"));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::backend::{AlertSubscription, SyncBackend};
use crate::error::BackendError;
use crate::types::{RawDesyncAlert, SyncTargetSet};

const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Engine command kinds, used to script failures and delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCommand {
    StartMasterServer,
    StopMasterServer,
    ConnectToMaster,
    DisconnectFromMaster,
    ConnectedClientsCount,
    ApplySyncTargets,
    SubscribeAlerts,
}

/// A recorded engine call with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    StartMasterServer { port: u16 },
    StopMasterServer,
    ConnectToMaster { host: String, port: u16 },
    DisconnectFromMaster,
    ConnectedClientsCount,
    ApplySyncTargets(SyncTargetSet),
    SubscribeAlerts,
}

impl BackendCall {
    pub fn command(&self) -> BackendCommand {
        match self {
            BackendCall::StartMasterServer { .. } => BackendCommand::StartMasterServer,
            BackendCall::StopMasterServer => BackendCommand::StopMasterServer,
            BackendCall::ConnectToMaster { .. } => BackendCommand::ConnectToMaster,
            BackendCall::DisconnectFromMaster => BackendCommand::DisconnectFromMaster,
            BackendCall::ConnectedClientsCount => BackendCommand::ConnectedClientsCount,
            BackendCall::ApplySyncTargets(_) => BackendCommand::ApplySyncTargets,
            BackendCall::SubscribeAlerts => BackendCommand::SubscribeAlerts,
        }
    }
}

#[derive(Default)]
struct Script {
    calls: Vec<BackendCall>,
    queued_failures: HashMap<BackendCommand, VecDeque<String>>,
    persistent_failures: HashMap<BackendCommand, String>,
    delays: HashMap<BackendCommand, Duration>,
    client_count: usize,
}

/// In-memory [`SyncBackend`] with scripted behaviour
pub struct ScriptedBackend {
    script: Mutex<Script>,
    alert_tx: broadcast::Sender<RawDesyncAlert>,
    live_subscriptions: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            script: Mutex::new(Script::default()),
            alert_tx,
            live_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the next call of `command` with `message`
    ///
    /// Queued failures are consumed in order, one per call.
    pub fn fail_next(&self, command: BackendCommand, message: impl Into<String>) {
        self.script
            .lock()
            .queued_failures
            .entry(command)
            .or_default()
            .push_back(message.into());
    }

    /// Fail every call of `command` until [`clear_failures`](Self::clear_failures)
    pub fn fail_always(&self, command: BackendCommand, message: impl Into<String>) {
        self.script
            .lock()
            .persistent_failures
            .insert(command, message.into());
    }

    pub fn clear_failures(&self) {
        let mut script = self.script.lock();
        script.queued_failures.clear();
        script.persistent_failures.clear();
    }

    /// Delay completion of every `command` call by `delay`
    pub fn set_delay(&self, command: BackendCommand, delay: Duration) {
        self.script.lock().delays.insert(command, delay);
    }

    /// Value returned by `connected_clients_count`, read when the call completes
    pub fn set_client_count(&self, count: usize) {
        self.script.lock().client_count = count;
    }

    /// Push an alert to every live subscription
    pub fn push_alert(&self, alert: RawDesyncAlert) -> usize {
        self.alert_tx.send(alert).unwrap_or(0)
    }

    /// Every call so far, in issue order
    pub fn calls(&self) -> Vec<BackendCall> {
        self.script.lock().calls.clone()
    }

    /// Calls of one kind, in issue order
    pub fn calls_to(&self, command: BackendCommand) -> Vec<BackendCall> {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| c.command() == command)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, command: BackendCommand) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| c.command() == command)
            .count()
    }

    /// Subscriptions handed out and not yet released
    pub fn live_subscriptions(&self) -> usize {
        self.live_subscriptions.load(Ordering::SeqCst)
    }

    /// Record the call, pick its scripted outcome, then wait out any delay
    async fn run(&self, call: BackendCall) -> Result<(), BackendError> {
        let command = call.command();
        let (failure, delay) = {
            let mut script = self.script.lock();
            script.calls.push(call);
            let queued = script
                .queued_failures
                .get_mut(&command)
                .and_then(|queue| queue.pop_front());
            let failure =
                queued.or_else(|| script.persistent_failures.get(&command).cloned());
            (failure, script.delays.get(&command).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(message) => Err(BackendError::new(message)),
            None => Ok(()),
        }
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncBackend for ScriptedBackend {
    async fn start_master_server(&self, port: u16) -> Result<(), BackendError> {
        self.run(BackendCall::StartMasterServer { port }).await
    }

    async fn stop_master_server(&self) -> Result<(), BackendError> {
        self.run(BackendCall::StopMasterServer).await
    }

    async fn connect_to_master(&self, host: &str, port: u16) -> Result<(), BackendError> {
        self.run(BackendCall::ConnectToMaster {
            host: host.to_string(),
            port,
        })
        .await
    }

    async fn disconnect_from_master(&self) -> Result<(), BackendError> {
        self.run(BackendCall::DisconnectFromMaster).await
    }

    async fn connected_clients_count(&self) -> Result<usize, BackendError> {
        self.run(BackendCall::ConnectedClientsCount).await?;
        Ok(self.script.lock().client_count)
    }

    async fn apply_sync_targets(&self, targets: &SyncTargetSet) -> Result<(), BackendError> {
        self.run(BackendCall::ApplySyncTargets(targets.clone())).await
    }

    async fn subscribe_alerts(&self) -> Result<AlertSubscription, BackendError> {
        // Register before the delay so a late-completing setup still hands
        // out a live subscription that the caller has to release.
        let receiver = self.alert_tx.subscribe();
        self.live_subscriptions.fetch_add(1, Ordering::SeqCst);
        let live = self.live_subscriptions.clone();
        let subscription = AlertSubscription::new(receiver).with_release_hook(move || {
            live.fetch_sub(1, Ordering::SeqCst);
        });

        self.run(BackendCall::SubscribeAlerts).await?;
        Ok(subscription)
    }
}
