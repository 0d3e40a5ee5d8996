//! SceneSync Core Library
//!
//! Client-side coordinator for LAN "one master, many slaves" scene sync.
//!
//! ## Overview
//!
//! A Master observes the local production tool and broadcasts changes;
//! Slaves receive the broadcasts and apply them. This crate governs the
//! network-role lifecycle (start/stop as Master, connect/disconnect as
//! Slave), keeps a bounded store of desync alerts pushed by the engine,
//! and selects which categories of scene state take part in sync.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use scenesync_core::{CoordinatorConfig, NetworkRole, SyncSession, SyncTarget, TcpBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = SyncSession::new(Arc::new(TcpBackend::new()), CoordinatorConfig::default())?;
//!
//!     session.select_role(NetworkRole::Master)?;
//!     session.start_as_master(8080).await?;
//!     session.toggle_target(SyncTarget::Preview).await?;
//!
//!     println!("{}", session.status());
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod sync;
pub mod testing;
pub mod types;

// Re-exports
pub use backend::{AlertSubscription, SyncBackend, TcpBackend};
pub use config::CoordinatorConfig;
pub use error::{BackendError, LifecycleOp, SyncError, SyncResult};
pub use session::{SessionSnapshot, SyncSession};
pub use sync::{
    AlertBuffer, AlertCounts, AlertFeed, AlertFilterView, ApplyStatus, ClientCountPoller,
    ConnectionState, RoleConnectionController, SessionEvent, SeverityFilter, SortOrder,
    SyncTargetConfigurator,
};
pub use types::*;
