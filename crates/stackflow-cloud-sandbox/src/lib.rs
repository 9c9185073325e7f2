//! Local sandbox provider for StackFlow
//!
//! Implements the `CloudProvider` trait against a simulated account kept
//! in `.stackflow/sandbox.json`, so stacks can be planned, applied and
//! destroyed without cloud credentials.
//!
//! # Behaviour
//!
//! - Physical ids are `<prefix>-<8 hex digits>` from a persisted counter
//! - Names are unique per resource type
//! - Dependencies must exist before a resource is created, and a resource
//!   cannot be deleted while something still depends on it
//! - `fail_next` injects retryable API errors for tests
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::{CloudProvider, Engine, StateManager};
//! use stackflow_cloud_sandbox::SandboxProvider;
//! use std::sync::Arc;
//!
//! let provider = Arc::new(SandboxProvider::new("."));
//! let engine = Engine::new(provider, StateManager::new("."));
//! let plan = engine.plan(&desired).await?;
//! ```

pub mod error;
pub mod provider;
pub mod store;

pub use error::{Result, SandboxError};
pub use provider::{KNOWN_INSTANCE_TYPES, SANDBOX_ACCOUNT_ID, SandboxProvider};
pub use store::{Account, AccountStore};
