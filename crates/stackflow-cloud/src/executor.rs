//! Plan executor
//!
//! Runs a plan against a provider in dependency waves, retrying transient
//! provider errors and undoing completed work when something fails.
//!
//! Execution has two phases. The teardown phase runs deletes and the
//! delete half of every replacement, dependents first. The apply phase
//! runs everything else, replacements included, in dependency order.

use crate::action::{Action, ActionType, ApplyResult, Plan};
use crate::error::{CloudError, Result};
use crate::provider::{CloudProvider, ResourceConfig, RetryConfig};
use crate::state::{GlobalState, ResourceState};
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Executes plans against a single provider
pub struct Executor {
    provider: Arc<dyn CloudProvider>,
    retry: RetryConfig,
    parallelism: usize,
    rollback: bool,
}

/// Which half of an action a phase runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Remove the recorded resource
    Teardown,
    /// Bring the resource to its desired config
    Apply,
}

/// How the recorded state changes after an action
enum StateChange {
    Keep,
    Set(ResourceState),
    Remove,
}

/// What it takes to undo a completed step
enum Undo {
    /// Delete what was created
    Created(ResourceState),
    /// Re-apply the previous config
    Updated {
        before: ResourceState,
        after: ResourceState,
    },
    /// Re-create from the previous config
    Deleted(ResourceState),
}

struct Applied {
    change: StateChange,
    undo: Option<Undo>,
    message: String,
}

struct Completed {
    action_id: String,
    undo: Undo,
}

impl Executor {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            provider,
            retry: RetryConfig::default(),
            parallelism: 4,
            rollback: true,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    /// Execute `plan`, recording every change in `state`
    #[tracing::instrument(skip_all, fields(provider = self.provider.name(), actions = plan.actions.len()))]
    pub async fn execute(&self, plan: &Plan, state: &mut GlobalState) -> ApplyResult {
        let start = Instant::now();
        let mut result = ApplyResult::new();
        let mut torn_down: HashSet<String> = HashSet::new();
        let mut done: HashSet<String> = HashSet::new();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut journal: Vec<Completed> = Vec::new();

        let teardowns: Vec<(usize, &Action)> = plan
            .actions
            .iter()
            .enumerate()
            .filter(|(_, a)| matches!(a.action_type, ActionType::Delete | ActionType::Replace))
            .collect();
        let applies: Vec<(usize, &Action)> = plan
            .actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.action_type != ActionType::Delete)
            .collect();

        for (step, phase) in [(Step::Teardown, teardowns), (Step::Apply, applies)] {
            // Replacements whose teardown did not succeed are already reported
            let mut pending: Vec<(usize, &Action)> = phase
                .into_iter()
                .filter(|(_, a)| !blocked.contains(&a.id))
                .collect();

            while !pending.is_empty() {
                if self.rollback && !result.failed.is_empty() {
                    for (_, action) in pending.drain(..) {
                        blocked.insert(action.id.clone());
                        result.add_skipped(action.id.clone(), "apply aborted".to_string());
                    }
                    break;
                }

                let finished = match step {
                    Step::Teardown => &torn_down,
                    Step::Apply => &done,
                };
                let mut ready = Vec::new();
                let mut waiting = Vec::new();
                let mut skipped_any = false;
                for (index, action) in pending {
                    let deps = match (step, action.action_type) {
                        (Step::Teardown, ActionType::Replace) => &action.teardown_after,
                        _ => &action.depends_on,
                    };
                    if let Some(dep) = deps.iter().find(|d| blocked.contains(*d)) {
                        tracing::warn!(action = %action.id, dependency = %dep, "Skipping action");
                        blocked.insert(action.id.clone());
                        result.add_skipped(
                            action.id.clone(),
                            format!("dependency {} did not succeed", dep),
                        );
                        skipped_any = true;
                    } else if deps.iter().all(|d| finished.contains(d)) {
                        ready.push((index, action));
                    } else {
                        waiting.push((index, action));
                    }
                }
                pending = waiting;

                if ready.is_empty() {
                    if skipped_any {
                        continue;
                    }
                    // Only unresolvable dependencies are left
                    for (_, action) in pending.drain(..) {
                        blocked.insert(action.id.clone());
                        result.add_skipped(action.id.clone(), "unresolved dependency".to_string());
                    }
                    break;
                }

                let prepared: Vec<(usize, &Action, Option<ResourceState>)> = ready
                    .into_iter()
                    .map(|(index, action)| {
                        let previous = state.get_resource(&action.key()).cloned();
                        (index, action, previous)
                    })
                    .collect();

                tracing::debug!(?step, wave = prepared.len(), "Running wave");

                let mut outcomes: Vec<(usize, &Action, Result<Applied>)> = stream::iter(prepared)
                    .map(|(index, action, previous)| async move {
                        (index, action, self.run_action(action, step, previous).await)
                    })
                    .buffer_unordered(self.parallelism)
                    .collect()
                    .await;
                outcomes.sort_by_key(|(index, _, _)| *index);

                for (_, action, outcome) in outcomes {
                    match outcome {
                        Ok(applied) => {
                            let key = action.key();
                            match applied.change {
                                StateChange::Keep => {}
                                StateChange::Set(resource) => state.set_resource(key, resource),
                                StateChange::Remove => {
                                    state.remove_resource(&key);
                                }
                            }
                            if let Some(undo) = applied.undo {
                                journal.push(Completed {
                                    action_id: action.id.clone(),
                                    undo,
                                });
                            }

                            match (step, action.action_type) {
                                // The apply half reports the replacement
                                (Step::Teardown, ActionType::Replace) => {
                                    tracing::info!(action = %action.id, "{}", applied.message);
                                    torn_down.insert(action.id.clone());
                                }
                                (_, ActionType::NoOp) => {
                                    done.insert(action.id.clone());
                                }
                                _ => {
                                    tracing::info!(action = %action.id, "{}", applied.message);
                                    torn_down.insert(action.id.clone());
                                    done.insert(action.id.clone());
                                    result.add_success(action.id.clone(), applied.message);
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(action = %action.id, error = %e, "Action failed");
                            blocked.insert(action.id.clone());
                            result.add_failure(action.id.clone(), e.to_string());
                        }
                    }
                }
            }
        }

        if self.rollback && !result.failed.is_empty() && !journal.is_empty() {
            self.roll_back(journal, state, &mut result).await;
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    async fn run_action(
        &self,
        action: &Action,
        step: Step,
        previous: Option<ResourceState>,
    ) -> Result<Applied> {
        let key = action.key();
        let desired = || {
            action.desired.as_ref().ok_or_else(|| {
                CloudError::InvalidConfig(format!("{} has no desired configuration", action.id))
            })
        };

        match (action.action_type, step) {
            (ActionType::Create, _) => {
                let desired = desired()?;
                let created = self.call("create", &key, || self.provider.create(desired)).await?;
                Ok(Applied {
                    message: format!("Created {} ({})", key, created.id),
                    change: StateChange::Set(created.clone()),
                    undo: Some(Undo::Created(created)),
                })
            }
            (ActionType::Update, _) => {
                let desired = desired()?;
                let before = previous.ok_or_else(|| CloudError::ResourceNotFound(key.clone()))?;
                let after = self
                    .call("update", &key, || self.provider.update(desired, &before))
                    .await?;
                Ok(Applied {
                    message: format!("Updated {} ({})", key, after.id),
                    change: StateChange::Set(after.clone()),
                    undo: Some(Undo::Updated { before, after }),
                })
            }
            (ActionType::Replace, Step::Apply) => {
                let desired = desired()?;
                let after = self.call("create", &key, || self.provider.create(desired)).await?;
                Ok(Applied {
                    message: format!("Replaced {} ({})", key, after.id),
                    change: StateChange::Set(after.clone()),
                    undo: Some(Undo::Created(after)),
                })
            }
            (ActionType::Delete, _) | (ActionType::Replace, Step::Teardown) => match previous {
                None => Ok(Applied {
                    message: format!("{} is already gone", key),
                    change: StateChange::Remove,
                    undo: None,
                }),
                Some(before) => {
                    self.call("delete", &key, || self.provider.delete(&before))
                        .await?;
                    Ok(Applied {
                        message: format!("Deleted {} ({})", key, before.id),
                        change: StateChange::Remove,
                        undo: Some(Undo::Deleted(before)),
                    })
                }
            },
            (ActionType::NoOp, _) => Ok(Applied {
                message: String::new(),
                change: StateChange::Keep,
                undo: None,
            }),
        }
    }

    /// Run a provider call, retrying retryable errors with backoff
    async fn call<T, F, Fut>(&self, operation: &str, key: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        resource = key,
                        attempt = attempt + 1,
                        error = %e,
                        "Retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Undo completed actions in reverse completion order
    async fn roll_back(
        &self,
        journal: Vec<Completed>,
        state: &mut GlobalState,
        result: &mut ApplyResult,
    ) {
        tracing::warn!(steps = journal.len(), "Rolling back");

        for entry in journal.into_iter().rev() {
            let outcome = self.undo(entry.undo, state).await;
            match &outcome {
                Ok(message) => tracing::info!(action = %entry.action_id, "{}", message),
                Err(e) => tracing::error!(action = %entry.action_id, error = %e, "Rollback step failed"),
            }
            result.add_rollback(entry.action_id, outcome.map_err(|e| e.to_string()));
        }
    }

    async fn undo(&self, undo: Undo, state: &mut GlobalState) -> Result<String> {
        match undo {
            Undo::Created(created) => {
                let key = created.key();
                self.call("delete", &key, || self.provider.delete(&created))
                    .await?;
                state.remove_resource(&key);
                Ok(format!("Deleted {}", key))
            }
            Undo::Updated { before, after } => {
                let key = after.key();
                let previous = before.to_config();
                let restored = self
                    .call("update", &key, || self.provider.update(&previous, &after))
                    .await?;
                state.set_resource(key.clone(), restored);
                Ok(format!("Restored previous configuration of {}", key))
            }
            Undo::Deleted(before) => {
                let key = before.key();
                let restored = self.recreate(&before).await?;
                state.set_resource(key.clone(), restored);
                Ok(format!("Re-created {}", key))
            }
        }
    }

    async fn recreate(&self, before: &ResourceState) -> Result<ResourceState> {
        let config: ResourceConfig = before.to_config();
        self.call("create", &before.key(), || self.provider.create(&config))
            .await
    }
}
