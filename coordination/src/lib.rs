//! Cascade Coordination Library
//!
//! Executes a PRD (a dependency-ordered task list) by routing each task to a
//! model tier, learning from per-signature outcome history, and escalating
//! to stronger models when cheaper ones fail.
//!
//! # Components
//!
//! - [`prd`]: task list types and the dependency resolver
//! - [`registry`]: validated model registry (tiers, pricing, ceiling)
//! - [`router`]: signatures, rule scoring and the history-adjusted router
//! - [`history`]: per-signature, per-model outcome counters
//! - [`cost`]: optimistic / expected / pessimistic cost estimates
//! - [`escalation`]: failure classification and the cascade executor
//! - [`orchestrator`]: session state machine, run loop and handle registry
//! - [`state`]: persistence (memory, JSON files, RocksDB with `heavy-state`)
//! - [`backend`]: execution backend and quality gate traits
//!
//! # Usage
//!
//! ```ignore
//! let store = FileStore::open(".cascade")?.shared();
//! let orchestrators = OrchestratorRegistry::new(
//!     store,
//!     Arc::new(ModelRegistry::default()),
//!     backend,
//!     CoordinationConfig::from_env(),
//! );
//! orchestrators.start("my-project", prd).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod backend;
pub mod config;
pub mod cost;
pub mod escalation;
pub mod history;
pub mod orchestrator;
pub mod prd;
pub mod registry;
pub mod router;
pub mod state;

// Re-export PRD types
pub use prd::{
    AcceptanceCriterion, Complexity, DependencyResolver, Prd, RunConfig, Task, TaskId,
    ValidationError, ValidationIssue,
};

// Re-export registry types
pub use registry::{ModelPricing, ModelRegistry, ModelSpec, ModelTier, RegistryConfig, RegistryError};

// Re-export routing types
pub use router::{
    ExecutionMode, ExecutionPlan, HistoryRouter, RouteOptions, RouteSource, RouterConfig,
    RouterError, RoutingDecision, RoutingPlan, ScoringRules, TaskSignature,
};

// Re-export history and cost types
pub use cost::{AggregateCostEstimate, CostConfig, CostEstimator, TaskCostEstimate};
pub use history::{HistoryStore, RoutingStats, TierStats, MIN_SAMPLES};

// Re-export escalation types
pub use escalation::{
    CascadeExecutor, CascadeOutcome, CascadePolicy, CascadeStatus, FailureCategory,
};

// Re-export backend seams
pub use backend::{BackendError, BackendOutcome, BackendRequest, ExecutionBackend, GateVerdict, QualityGate};

// Re-export orchestrator types
pub use orchestrator::{ControlAction, ControlError, ControlResponse, OrchestratorRegistry};

// Re-export state types
#[cfg(feature = "heavy-state")]
pub use state::RocksStore;
pub use state::{
    AttemptRecord, FileStore, Guardrail, MemoryStore, ProjectStore, SessionRecord, SessionStatus,
    SharedStore, StoreError, StoreResult,
};

pub use config::{ConfigError, CoordinationConfig, SchedulerConfig};
