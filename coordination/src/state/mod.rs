//! State persistence for routing history and orchestration sessions
//!
//! Everything durable lives behind the [`ProjectStore`] trait:
//!
//! - `patterns`: per (signature, model) outcome counters
//! - `sessions`: orchestration session records
//! - `attempts`: append-only attempt log
//! - `guardrails`: append-only lessons from failed attempts
//!
//! # Backends
//!
//! - [`MemoryStore`]: volatile, for tests and one-shot runs
//! - [`FileStore`]: JSON files, readable by every process sharing the root
//! - `RocksStore`: RocksDB column families (`heavy-state` feature)
//!
//! # Usage
//!
//! ```ignore
//! use cascade_coordination::state::{FileStore, ProjectStore};
//!
//! let store = FileStore::open("./.cascade")?;
//! let pattern = store.upsert_pattern("my-app", "3f9a…", "claude-haiku", true, 0.002)?;
//! assert_eq!(pattern.samples(), 1);
//! ```

pub mod file_store;
#[cfg(feature = "heavy-state")]
pub mod rocks_store;
pub mod schema;
pub mod store;
pub mod types;

pub use file_store::FileStore;
#[cfg(feature = "heavy-state")]
pub use rocks_store::RocksStore;
pub use store::{MemoryStore, ProjectStore, SharedStore, StoreError, StoreResult};
pub use types::{
    AttemptRecord, ControlSignal, Guardrail, RoutingPattern, SessionId, SessionRecord,
    SessionStatus, TaskOutcome, TaskState,
};
