//! Connection state and session event types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ConnectionState: the single source of truth for UI gating      │
//! │  ├── Disconnected: initial; reachable from every state          │
//! │  ├── Connecting: start/connect in flight                        │
//! │  ├── Connected: peer count present for Master only              │
//! │  └── Error: start/connect failed with the engine's message      │
//! │                                                                 │
//! │  SessionEvent: change notifications for observers               │
//! │  ├── RoleSelected / RoleCleared                                 │
//! │  ├── StatusChanged / LifecycleFailed                            │
//! │  ├── AlertReceived / AlertsCleared                              │
//! │  └── TargetsChanged                                             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LifecycleOp;
use crate::sync::targets::ApplyStatus;
use crate::types::{DesyncAlert, NetworkRole, SyncTargetSet};

/// Connection state of the active network role
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected {
        /// Number of attached slaves; only tracked while serving as Master
        #[serde(rename = "peerCount", default, skip_serializing_if = "Option::is_none")]
        peer_count: Option<usize>,
    },
    Error {
        #[serde(rename = "lastError")]
        last_error: String,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }

    pub fn peer_count(&self) -> Option<usize> {
        match self {
            ConnectionState::Connected { peer_count } => *peer_count,
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            ConnectionState::Error { last_error } => Some(last_error),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected { peer_count: None } => write!(f, "Connected"),
            ConnectionState::Connected {
                peer_count: Some(count),
            } => write!(f, "Connected ({} peers)", count),
            ConnectionState::Error { last_error } => write!(f, "Error: {}", last_error),
        }
    }
}

/// Events emitted by a [`SyncSession`](crate::SyncSession) and its components
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A network role was chosen for this session
    RoleSelected { role: NetworkRole },
    /// The session was reset to "no role selected"
    RoleCleared,
    /// Connection state changed
    StatusChanged {
        role: NetworkRole,
        status: ConnectionState,
    },
    /// A lifecycle command failed in the engine
    LifecycleFailed {
        role: NetworkRole,
        op: LifecycleOp,
        message: String,
    },
    /// A desync alert was stored
    AlertReceived(DesyncAlert),
    /// Alerts were removed by clear-one or clear-all
    AlertsCleared { removed: usize },
    /// Local sync target selection or its apply status changed
    TargetsChanged {
        targets: SyncTargetSet,
        status: ApplyStatus,
    },
}
