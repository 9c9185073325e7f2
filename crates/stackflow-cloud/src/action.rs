//! Plans, actions and apply results

use crate::provider::{ResourceConfig, resource_key};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One step of a plan, applied to a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// `<action>-<type>:<id>`, e.g. `create-bucket:bucket2`
    pub id: String,
    pub action_type: ActionType,
    pub resource_type: String,

    /// Logical id of the resource
    pub resource_id: String,

    /// Human readable summary
    pub description: String,

    /// Extra information for display (`provider`, `changes`, `replace_fields`,
    /// `cascade_from`, `physical_id`)
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,

    /// Desired configuration (absent for deletes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<ResourceConfig>,

    /// Ids of actions that must succeed before this one runs
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Replacements only: ids whose teardown must finish before the old
    /// resource is deleted (its dependents)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown_after: Vec<String>,
}

impl Action {
    /// Resource key (type:id) the action applies to
    pub fn key(&self) -> String {
        resource_key(&self.resource_type, &self.resource_id)
    }

    /// Action id for a given action type and resource key
    pub fn id_for(action_type: ActionType, key: &str) -> String {
        format!("{}-{}", action_type, key)
    }
}

/// What the executor does with a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    /// Apply the desired config to the existing resource
    Update,
    /// Delete, then create again (a force-new field changed, or a dependency
    /// is being replaced)
    Replace,
    Delete,
    NoOp,
}

impl ActionType {
    /// Prefix used in action ids
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Replace => "replace",
            ActionType::Delete => "delete",
            ActionType::NoOp => "no-op",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of executing a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    pub succeeded: Vec<ActionResult>,
    pub failed: Vec<ActionResult>,

    /// Actions not attempted because a dependency did not succeed
    pub skipped: Vec<ActionResult>,

    /// Compensating steps taken after a failure
    pub rolled_back: Vec<ActionResult>,

    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action ran and none failed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn add_success(&mut self, action_id: String, message: String) {
        self.succeeded.push(ActionResult::ok(action_id, message));
    }

    pub fn add_failure(&mut self, action_id: String, error: String) {
        self.failed.push(ActionResult::err(action_id, error));
    }

    pub fn add_skipped(&mut self, action_id: String, reason: String) {
        self.skipped.push(ActionResult {
            success: false,
            ..ActionResult::ok(action_id, reason)
        });
    }

    pub fn add_rollback(&mut self, action_id: String, outcome: Result<String, String>) {
        self.rolled_back.push(match outcome {
            Ok(message) => ActionResult::ok(action_id, message),
            Err(error) => ActionResult::err(action_id, error),
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    pub success: bool,

    /// What happened, or why the action was skipped
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    fn ok(action_id: String, message: String) -> Self {
        Self {
            action_id,
            success: true,
            message,
            error: None,
        }
    }

    fn err(action_id: String, error: String) -> Self {
        Self {
            action_id,
            success: false,
            message: String::new(),
            error: Some(error),
        }
    }
}

/// Plan containing all actions to be applied, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Stack the plan was built for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// List of actions to perform
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            stack: None,
            actions,
            has_changes,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Get an action by id
    pub fn get(&self, action_id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    /// Actions that change something
    pub fn changes(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type != ActionType::NoOp)
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            replace: self.actions_by_type(ActionType::Replace).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_change
        )
    }
}
