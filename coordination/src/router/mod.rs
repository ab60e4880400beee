//! Model Router Module
//!
//! Routes PRD tasks to model tiers based on:
//! - Rule scoring (complexity, files, criteria, tags)
//! - Per-signature outcome history
//! - Explicit model preferences
//!
//! # Tier Selection
//!
//! ```text
//! Score    | Tier     | History adjustment
//! ---------|----------|-------------------------------------------
//! 0-20     | free     | fail rate > 50% (>= 3 samples) -> one up
//! 21-40    | cheap    | cheaper tier success > 80% with
//! 41-65    | mid      |   confidence > 0.5 -> one down
//! 66-100   | premium  |
//! ```

pub mod history_router;
pub mod plan;
pub mod scoring;
pub mod signature;

pub use history_router::{
    HistoryRouter, RouteOptions, RouteSource, RouterConfig, RouterError, RoutingDecision,
};
pub use plan::{ExecutionMode, ExecutionPlan, RoutingPlan, TaskRoute};
pub use scoring::{RuleScore, ScoreContribution, ScoringRules};
pub use signature::{FilesBucket, TaskSignature};
