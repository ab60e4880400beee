//! Orchestrator: PRD sessions from start to a terminal state
//!
//! # Per task
//!
//! ```text
//! scheduler picks ready task
//!     │
//!     ▼
//! route (rules + history + preference)
//!     │
//!     ▼
//! prompt = task + matching guardrails
//!     │
//!     ▼
//! cascade (attempts, gate, escalation) ──► history store
//!     │
//!     ▼
//! attempts + guardrails appended, counters updated, session persisted
//!     │
//!     ├─ completed
//!     ├─ failed → abort session, or skip dependents and continue
//!     └─ cancelled → no outcome, loop stops
//! ```

pub mod guardrails;
pub mod prompt;
pub mod registry;
pub mod run_loop;
pub mod scheduler;
pub mod session;

pub use guardrails::MAX_PROMPT_GUARDRAILS;
pub use prompt::build_prompt;
pub use registry::OrchestratorRegistry;
pub use run_loop::RunError;
pub use scheduler::{Scheduler, Selection};
pub use session::{
    can_transition, effective_status, queue_signal, ControlAction, ControlError,
    ControlResponse,
};
