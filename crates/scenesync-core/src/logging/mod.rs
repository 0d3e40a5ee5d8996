//! JSONL log capture for coordinator sessions
//!
//! Each session appends to its own file so several master/slave processes
//! on one machine never interleave writes:
//!
//! ```text
//! logs/
//! └── raw/                         # one file per instance per day
//!     ├── 2026-10-19_master.jsonl
//!     └── 2026-10-19_slave.jsonl
//! ```
//!
//! ```ignore
//! use scenesync_core::logging::JsonlLayer;
//! use tracing_subscriber::prelude::*;
//!
//! let jsonl = JsonlLayer::new("./logs", "master")?;
//! tracing_subscriber::registry()
//!     .with(jsonl)
//!     .with(tracing_subscriber::fmt::layer())
//!     .init();
//! ```
//!
//! Query with jq, e.g. every lifecycle failure of the day:
//!
//! ```bash
//! jq 'select(.level == "warn" and (.msg | test("Lifecycle")))' logs/raw/*.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::LogRecord;
pub use layer::JsonlLayer;
pub use writer::{read_records, LogFileWriter};
