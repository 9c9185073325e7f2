//! StackFlow deployment engine
//!
//! Reconciles a desired set of cloud resources with what a provider
//! reports, records the outcome in a local state file, and rolls back
//! partially applied changes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ ResourceSet  │──▶│     diff     │──▶│ build_plan   │
//! │  (desired)   │   │  + refresh   │   │   (Plan)     │
//! └──────────────┘   └──────▲───────┘   └──────┬───────┘
//!                           │                  │
//!                    ┌──────┴───────┐   ┌──────▼───────┐
//!                    │ StateManager │◀──│   Executor   │
//!                    │ state.json   │   │ waves/retry  │
//!                    └──────────────┘   └──────┬───────┘
//!                                              │
//!                                     ┌────────▼────────┐
//!                                     │ dyn CloudProvider│
//!                                     └─────────────────┘
//! ```

pub mod action;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod planner;
pub mod provider;
pub mod state;

#[cfg(test)]
mod mock;

// Re-exports
pub use action::{Action, ActionResult, ActionType, ApplyResult, Plan, PlanSummary};
pub use diff::{DiffKind, FieldChange, RefreshReport, ResourceDiff, diff, diff_config, refresh};
pub use engine::{Engine, EngineOptions};
pub use error::{CloudError, Result};
pub use executor::Executor;
pub use planner::build_plan;
pub use provider::{
    AuthStatus, CloudProvider, ResourceConfig, ResourceSet, RetryConfig, resource_key,
};
pub use state::{
    GlobalState, ProviderState, ResourceState, ResourceStatus, STATE_DIR, StateLock, StateManager,
};
