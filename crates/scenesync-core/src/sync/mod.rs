//! Synchronization coordinator
//!
//! Reconciles three asynchronous sources of truth into one observable
//! session state:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  user commands ──▶ RoleConnectionController ──▶ StatusCell      │
//! │                      └── ClientCountPoller (Master only)        │
//! │                            └── periodic peer count ─────┘       │
//! │                                                                 │
//! │  engine push ───▶ AlertFeed ──▶ AlertBuffer ──▶ AlertFilterView │
//! │                                                                 │
//! │  user toggles ──▶ SyncTargetConfigurator ──▶ apply-sync-targets │
//! │                                                                 │
//! │  every change ──▶ broadcast::Sender<SessionEvent>               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod alert_view;
pub mod alerts;
pub mod connection;
pub mod events;
pub mod poller;
pub mod targets;

pub use alert_view::{AlertCounts, AlertFilterView, SeverityFilter, SortOrder};
pub use alerts::{AlertBuffer, AlertFeed};
pub use connection::RoleConnectionController;
pub use events::{ConnectionState, SessionEvent};
pub use poller::ClientCountPoller;
pub use targets::{ApplyStatus, SyncTargetConfigurator};
