//! Escalation Cascade: retry, escalate or give up per failed attempt
//!
//! Drives a single task through its routed model and, on failure, along the
//! decision's escalation path. All decisions are deterministic; the only
//! side effects are backend calls and history writes.
//!
//! # Cascade
//!
//! ```text
//! routed model
//!     │
//!     ├─ success (and gate passes) → done, history += success
//!     ├─ syntax / validation       → retry same model (max_retries)
//!     ├─ capability                → next model on the path
//!     ├─ timeout                   → next model, else retry same
//!     ├─ unknown                   → retry, then next model
//!     │
//!     ▼
//! next model on the path (rest of tier, then higher tiers)
//!     │
//!     ▼
//! path exhausted or attempt cap reached → task failed
//! ```

pub mod classify;
pub mod engine;
pub mod policy;
pub mod state;

pub use classify::{classify, classify_message, FailureCategory};
pub use engine::{CascadeExecutor, CascadeOutcome, CascadeRequest, CascadeStatus};
pub use policy::{CascadeAction, CascadeDecision, CascadePolicy};
pub use state::{CascadeState, EscalationRecord, FailureRecord};
