//! Deployment engine
//!
//! Ties the state store, diff, planner and executor together behind the
//! plan / apply / destroy operations used by the CLI.

use crate::action::{ApplyResult, Plan};
use crate::diff::{diff, refresh};
use crate::error::{CloudError, Result};
use crate::executor::Executor;
use crate::planner::build_plan;
use crate::provider::{CloudProvider, ResourceSet, RetryConfig};
use crate::state::{GlobalState, StateManager};
use std::sync::Arc;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub retry: RetryConfig,
    pub parallelism: usize,
    pub rollback: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            parallelism: 4,
            rollback: true,
        }
    }
}

pub struct Engine {
    provider: Arc<dyn CloudProvider>,
    state_manager: StateManager,
    options: EngineOptions,
}

impl Engine {
    pub fn new(provider: Arc<dyn CloudProvider>, state_manager: StateManager) -> Self {
        Self {
            provider,
            state_manager,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn provider(&self) -> &dyn CloudProvider {
        self.provider.as_ref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Load the recorded state without touching the provider
    pub async fn state(&self) -> Result<GlobalState> {
        self.state_manager.load().await
    }

    /// Plan the changes needed to reach `desired`
    #[tracing::instrument(skip_all, fields(provider = self.provider.name()))]
    pub async fn plan(&self, desired: &ResourceSet) -> Result<Plan> {
        let mut state = self.state_manager.load().await?;
        self.plan_against(desired, &mut state).await
    }

    /// Plan the removal of every managed resource
    pub async fn plan_destroy(&self) -> Result<Plan> {
        self.plan(&ResourceSet::new()).await
    }

    /// Bring the provider to `desired` and record the outcome
    #[tracing::instrument(skip_all, fields(provider = self.provider.name()))]
    pub async fn apply(&self, desired: &ResourceSet) -> Result<ApplyResult> {
        let lock = self.state_manager.acquire_lock().await?;
        let mut state = self.state_manager.load().await?;

        let plan = self.plan_against(desired, &mut state).await?;
        let result = self.executor().execute(&plan, &mut state).await;

        if plan.stack.is_some() {
            state.stack = plan.stack.clone();
        }
        self.state_manager.save(&mut state).await?;
        lock.release().await?;

        tracing::info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            "Apply finished in {}ms",
            result.duration_ms
        );
        Ok(result)
    }

    /// Execute a previously built plan
    #[tracing::instrument(skip_all, fields(provider = self.provider.name()))]
    pub async fn apply_plan(&self, plan: &Plan) -> Result<ApplyResult> {
        let lock = self.state_manager.acquire_lock().await?;
        let mut state = self.state_manager.load().await?;

        let result = self.executor().execute(plan, &mut state).await;

        if plan.stack.is_some() {
            state.stack = plan.stack.clone();
        }
        self.state_manager.save(&mut state).await?;
        lock.release().await?;
        Ok(result)
    }

    /// Delete every managed resource
    pub async fn destroy(&self) -> Result<ApplyResult> {
        self.apply(&ResourceSet::new()).await
    }

    async fn plan_against(&self, desired: &ResourceSet, state: &mut GlobalState) -> Result<Plan> {
        let auth = self.provider.check_auth().await?;
        if !auth.authenticated {
            return Err(CloudError::AuthenticationFailed(
                auth.error.unwrap_or_else(|| self.provider.display_name().to_string()),
            ));
        }

        let observed = self.provider.get_state().await?;
        let report = refresh(state, self.provider.name(), &observed, desired);
        if !report.is_clean() {
            tracing::info!(
                missing = report.missing.len(),
                drifted = report.drifted.len(),
                adopted = report.adopted.len(),
                "Refreshed state from provider"
            );
        }

        let diffs = diff(desired, state);
        let mut plan = build_plan(desired, state, &diffs)?;
        plan.stack = desired.stack.clone();
        Ok(plan)
    }

    fn executor(&self) -> Executor {
        Executor::new(self.provider.clone())
            .with_retry(self.options.retry.clone())
            .with_parallelism(self.options.parallelism)
            .with_rollback(self.options.rollback)
    }
}
