//! Error types for the scene sync coordinator

use std::fmt;

use thiserror::Error;

use crate::types::NetworkRole;

/// Failure reported by the sync engine for a single command.
///
/// Displays as the engine's message verbatim, so it can be stored in
/// [`ConnectionState::Error`](crate::ConnectionState::Error) unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    /// Create a backend error carrying the engine's message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The engine's failure message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Lifecycle commands issued by the connection controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOp {
    StartMaster,
    StopMaster,
    ConnectSlave,
    DisconnectSlave,
}

impl LifecycleOp {
    /// The role this command belongs to
    pub fn role(&self) -> NetworkRole {
        match self {
            LifecycleOp::StartMaster | LifecycleOp::StopMaster => NetworkRole::Master,
            LifecycleOp::ConnectSlave | LifecycleOp::DisconnectSlave => NetworkRole::Slave,
        }
    }
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleOp::StartMaster => write!(f, "start master server"),
            LifecycleOp::StopMaster => write!(f, "stop master server"),
            LifecycleOp::ConnectSlave => write!(f, "connect to master"),
            LifecycleOp::DisconnectSlave => write!(f, "disconnect from master"),
        }
    }
}

/// Main error type for coordinator operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// A start/stop/connect/disconnect command failed in the engine
    #[error("Failed to {op}: {source}")]
    Lifecycle {
        op: LifecycleOp,
        #[source]
        source: BackendError,
    },

    /// The engine rejected a new set of sync targets
    #[error("Failed to apply sync targets: {0}")]
    ApplyTargets(#[source] BackendError),

    /// Port outside the 1024-65535 range
    #[error("Invalid port {0}: must be between 1024 and 65535")]
    InvalidPort(u16),

    /// Empty or malformed master host
    #[error("Invalid host: {0:?}")]
    InvalidHost(String),

    /// Lifecycle command issued from a state it is not valid in
    #[error("Cannot {op} while {state}")]
    InvalidTransition { op: LifecycleOp, state: String },

    /// Operation requires a role but none has been selected
    #[error("No network role selected")]
    NoRoleSelected,

    /// A role is already active; a full reset is required first
    #[error("Role already selected: {0}")]
    RoleAlreadySelected(NetworkRole),

    /// Command belongs to the other role
    #[error("Cannot {op} in {role} mode")]
    WrongRole { op: LifecycleOp, role: NetworkRole },

    /// A stop, disconnect or reset moved the session on before this command finished
    #[error("{0} was superseded by a later lifecycle command")]
    Superseded(LifecycleOp),

    /// The controller was retired by a session reset
    #[error("Cannot {0}: role controller was retired by a session reset")]
    Retired(LifecycleOp),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Unparseable user input (severity filters, targets, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// The engine's message, if this error came from the engine
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            SyncError::Lifecycle { source, .. } => Some(source.message()),
            SyncError::ApplyTargets(source) => Some(source.message()),
            _ => None,
        }
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
