//! Plan builder
//!
//! Turns resource diffs into an ordered list of actions. Deletes come
//! first (dependents before their dependencies), followed by every other
//! action in dependency order.
//!
//! Replacing a resource also replaces every recorded resource that
//! depends on it. A replacement is torn down together with the deletes,
//! after the teardown of its own dependents, and created again in
//! dependency order.

use crate::action::{Action, ActionType, Plan};
use crate::diff::{DiffKind, ResourceDiff};
use crate::error::{CloudError, Result};
use crate::provider::{ResourceConfig, ResourceSet};
use crate::state::{GlobalState, ResourceState};
use std::collections::{BTreeMap, BTreeSet};

/// Build an execution plan from the diffs between `desired` and `current`
pub fn build_plan(
    desired: &ResourceSet,
    current: &GlobalState,
    diffs: &[ResourceDiff],
) -> Result<Plan> {
    check_dependencies(desired, current)?;

    let kinds: BTreeMap<&str, &ResourceDiff> = diffs.iter().map(|d| (d.key.as_str(), d)).collect();

    // Everything else follows the desired dependency order
    let graph: BTreeMap<String, Vec<String>> = desired
        .resources
        .iter()
        .map(|(key, resource)| {
            let deps = resource
                .depends_on
                .iter()
                .filter(|dep| desired.contains_key(dep))
                .cloned()
                .collect();
            (key.clone(), deps)
        })
        .collect();
    let order = topological_order(&graph)?;

    let mut action_types: BTreeMap<String, ActionType> = order
        .iter()
        .map(|key| {
            let action_type = match kinds.get(key.as_str()) {
                Some(d) => match d.kind {
                    DiffKind::Added => ActionType::Create,
                    DiffKind::Changed if d.requires_replacement => ActionType::Replace,
                    DiffKind::Changed => ActionType::Update,
                    DiffKind::Unchanged | DiffKind::Removed => ActionType::NoOp,
                },
                None if current.get_resource(key).is_some() => ActionType::NoOp,
                None => ActionType::Create,
            };
            (key.clone(), action_type)
        })
        .collect();
    let causes = cascade_replacements(desired, current, &mut action_types);

    let removed: BTreeSet<&str> = diffs
        .iter()
        .filter(|d| d.kind == DiffKind::Removed && current.get_resource(&d.key).is_some())
        .map(|d| d.key.as_str())
        .collect();

    // Every resource deleted by this plan, with the action that deletes it
    let teardown: BTreeMap<String, String> = removed
        .iter()
        .map(|key| (key.to_string(), Action::id_for(ActionType::Delete, key)))
        .chain(
            action_types
                .iter()
                .filter(|(_, t)| **t == ActionType::Replace)
                .map(|(key, t)| (key.clone(), Action::id_for(*t, key))),
        )
        .collect();

    let mut actions = delete_actions(current, &removed, &teardown)?;

    for key in order {
        let Some(resource) = desired.get_by_key(&key) else {
            continue;
        };
        let action_type = action_types[&key];

        let depends_on = graph[&key]
            .iter()
            .filter(|dep| action_types[*dep] != ActionType::NoOp)
            .map(|dep| Action::id_for(action_types[dep], dep))
            .collect();

        let mut action = desired_action(action_type, resource, kinds.get(key.as_str()).copied());
        action.depends_on = depends_on;
        if action_type == ActionType::Replace {
            action.teardown_after = teardown_dependents(current, &teardown, &key);
            if let Some(cause) = causes.get(&key) {
                action.description = format!(
                    "Replace {} {} ({} is replaced)",
                    resource.resource_type, resource.id, cause
                );
                action
                    .details
                    .insert("cascade_from".to_string(), serde_json::json!(cause));
            }
        }
        actions.push(action);
    }

    let plan = Plan::new(actions);
    tracing::debug!(summary = %plan.summary(), "Built plan");
    Ok(plan)
}

/// Every dependency must be desired or already recorded
fn check_dependencies(desired: &ResourceSet, current: &GlobalState) -> Result<()> {
    for resource in desired.iter() {
        for dep in &resource.depends_on {
            if !desired.contains_key(dep) && current.get_resource(dep).is_none() {
                return Err(CloudError::InvalidConfig(format!(
                    "{} depends on unknown resource {}",
                    resource.key(),
                    dep
                )));
            }
        }
    }
    Ok(())
}

/// Turn recorded dependents of replaced resources into replacements too
///
/// Returns the dependency that caused each cascaded replacement.
fn cascade_replacements(
    desired: &ResourceSet,
    current: &GlobalState,
    action_types: &mut BTreeMap<String, ActionType>,
) -> BTreeMap<String, String> {
    let mut causes = BTreeMap::new();
    let mut queue: Vec<String> = action_types
        .iter()
        .filter(|(_, t)| **t == ActionType::Replace)
        .map(|(key, _)| key.clone())
        .collect();

    while let Some(replaced) = queue.pop() {
        for resource in desired.iter() {
            let key = resource.key();
            let Some(recorded) = current.get_resource(&key) else {
                continue;
            };
            let depends = resource.depends_on.contains(&replaced)
                || recorded.depends_on.contains(&replaced);
            if depends
                && matches!(
                    action_types.get(&key),
                    Some(ActionType::Update | ActionType::NoOp)
                )
            {
                tracing::debug!(resource = %key, dependency = %replaced, "Cascading replacement");
                action_types.insert(key.clone(), ActionType::Replace);
                causes.insert(key.clone(), replaced.clone());
                queue.push(key);
            }
        }
    }

    causes
}

/// Teardown actions of the recorded dependents of `key`
fn teardown_dependents(
    current: &GlobalState,
    teardown: &BTreeMap<String, String>,
    key: &str,
) -> Vec<String> {
    teardown
        .iter()
        .filter(|(other, _)| {
            current
                .get_resource(other)
                .is_some_and(|state| state.depends_on.iter().any(|d| d == key))
        })
        .map(|(_, id)| id.clone())
        .collect()
}

fn delete_actions(
    current: &GlobalState,
    removed: &BTreeSet<&str>,
    teardown: &BTreeMap<String, String>,
) -> Result<Vec<Action>> {
    let recorded: BTreeMap<String, &ResourceState> = removed
        .iter()
        .filter_map(|key| current.get_resource(key).map(|r| (key.to_string(), r)))
        .collect();

    let graph: BTreeMap<String, Vec<String>> = recorded
        .iter()
        .map(|(key, state)| {
            let deps = state
                .depends_on
                .iter()
                .filter(|dep| removed.contains(dep.as_str()))
                .cloned()
                .collect();
            (key.clone(), deps)
        })
        .collect();

    let mut order = topological_order(&graph)?;
    order.reverse();

    let actions = order
        .into_iter()
        .map(|key| {
            let state = recorded[&key];
            Action {
                id: Action::id_for(ActionType::Delete, &key),
                action_type: ActionType::Delete,
                resource_type: state.resource_type.clone(),
                resource_id: state.logical_id.clone(),
                description: format!("Delete {} {} ({})", state.resource_type, state.logical_id, state.id),
                details: [
                    ("provider".to_string(), serde_json::json!(state.provider)),
                    ("physical_id".to_string(), serde_json::json!(state.id)),
                ]
                .into_iter()
                .collect(),
                desired: None,
                depends_on: teardown_dependents(current, teardown, &key),
                teardown_after: Vec::new(),
            }
        })
        .collect();

    Ok(actions)
}

fn desired_action(
    action_type: ActionType,
    resource: &ResourceConfig,
    diff: Option<&ResourceDiff>,
) -> Action {
    let key = resource.key();
    let description = match action_type {
        ActionType::Create => format!("Create {} {}", resource.resource_type, resource.id),
        ActionType::Update => format!("Update {} {} in place", resource.resource_type, resource.id),
        ActionType::Replace => format!("Replace {} {}", resource.resource_type, resource.id),
        ActionType::Delete => format!("Delete {} {}", resource.resource_type, resource.id),
        ActionType::NoOp => format!("{} {} is up to date", resource.resource_type, resource.id),
    };

    let mut details = BTreeMap::new();
    details.insert("provider".to_string(), serde_json::json!(resource.provider));
    if let Some(diff) = diff
        && !diff.changes.is_empty()
    {
        details.insert("changes".to_string(), serde_json::json!(diff.changes));
    }
    if action_type == ActionType::Replace
        && let Some(diff) = diff
    {
        let fields: Vec<&str> = diff
            .changes
            .iter()
            .map(|c| c.path.split('.').next().unwrap_or(&c.path))
            .filter(|top| resource.force_new.iter().any(|f| f == *top))
            .collect();
        details.insert("replace_fields".to_string(), serde_json::json!(fields));
    }

    Action {
        id: Action::id_for(action_type, &key),
        action_type,
        resource_type: resource.resource_type.clone(),
        resource_id: resource.id.clone(),
        description,
        details,
        desired: Some(resource.clone()),
        depends_on: Vec::new(),
        teardown_after: Vec::new(),
    }
}

/// Kahn's algorithm over `node -> dependencies`, ties broken by key
fn topological_order(graph: &BTreeMap<String, Vec<String>>) -> Result<Vec<String>> {
    let mut remaining: BTreeMap<&str, usize> = graph
        .iter()
        .map(|(node, deps)| (node.as_str(), deps.iter().filter(|d| graph.contains_key(*d)).count()))
        .collect();

    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(node, _)| *node)
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(node) = ready.pop_first() {
        remaining.remove(node);
        order.push(node.to_string());

        for (dependent, deps) in graph {
            if deps.iter().any(|d| d == node)
                && let Some(count) = remaining.get_mut(dependent.as_str())
            {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent.as_str());
                }
            }
        }
    }

    if !remaining.is_empty() {
        let nodes: Vec<&str> = remaining.keys().copied().collect();
        return Err(CloudError::CircularDependency(nodes.join(", ")));
    }

    Ok(order)
}
