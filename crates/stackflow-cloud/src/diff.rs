//! Diff engine
//!
//! Compares the desired resource set against the recorded state, and
//! reconciles the recorded state with what the provider reports.

use crate::provider::{ResourceConfig, ResourceSet};
use crate::state::{GlobalState, ProviderState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of difference for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    /// Desired but not recorded
    Added,
    /// Recorded with a different configuration
    Changed,
    /// Recorded but no longer desired
    Removed,
    /// Recorded with the desired configuration
    Unchanged,
}

/// A single differing config value, addressed by dotted path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub path: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Difference between desired and recorded state for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// Resource key (type:id)
    pub key: String,
    pub kind: DiffKind,
    pub changes: Vec<FieldChange>,
    pub requires_replacement: bool,
}

/// Diff the desired set against the recorded state, sorted by key
pub fn diff(desired: &ResourceSet, current: &GlobalState) -> Vec<ResourceDiff> {
    let mut diffs = Vec::new();

    for (key, resource) in &desired.resources {
        let diff = match current.get_resource(key) {
            None => ResourceDiff {
                key: key.clone(),
                kind: DiffKind::Added,
                changes: Vec::new(),
                requires_replacement: false,
            },
            Some(recorded) => {
                let changes = diff_config(&recorded.config, &resource.config);
                let requires_replacement = changes
                    .iter()
                    .any(|c| forces_replacement(resource, &c.path));
                let kind = if changes.is_empty() && recorded.depends_on == resource.depends_on {
                    DiffKind::Unchanged
                } else {
                    DiffKind::Changed
                };
                ResourceDiff {
                    key: key.clone(),
                    kind,
                    changes,
                    requires_replacement,
                }
            }
        };
        diffs.push(diff);
    }

    for key in current.resources.keys() {
        if !desired.contains_key(key) {
            diffs.push(ResourceDiff {
                key: key.clone(),
                kind: DiffKind::Removed,
                changes: Vec::new(),
                requires_replacement: false,
            });
        }
    }

    diffs.sort_by(|a, b| a.key.cmp(&b.key));
    diffs
}

fn forces_replacement(resource: &ResourceConfig, path: &str) -> bool {
    let top = path.split('.').next().unwrap_or(path);
    resource.force_new.iter().any(|f| f == top)
}

/// Recursively compare two config values
///
/// Objects are compared key by key; any other value (including arrays)
/// is compared as a whole.
pub fn diff_config(before: &Value, after: &Value) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    collect_changes("", Some(before), Some(after), &mut changes);
    changes
}

fn collect_changes(
    path: &str,
    before: Option<&Value>,
    after: Option<&Value>,
    out: &mut Vec<FieldChange>,
) {
    match (before, after) {
        (Some(Value::Object(b)), Some(Value::Object(a))) => {
            let mut keys: Vec<&String> = b.keys().chain(a.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                collect_changes(&child, b.get(key), a.get(key), out);
            }
        }
        (b, a) if b == a => {}
        (b, a) => out.push(FieldChange {
            path: path.to_string(),
            before: b.cloned(),
            after: a.cloned(),
        }),
    }
}

/// Outcome of reconciling recorded state with the provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Recorded resources the provider no longer reports
    pub missing: Vec<String>,
    /// Recorded resources whose observed config differs
    pub drifted: Vec<String>,
    /// Desired resources the provider reports but the state did not record
    pub adopted: Vec<String>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.drifted.is_empty() && self.adopted.is_empty()
    }
}

/// Reconcile the recorded state of `provider`'s resources with what it reports
///
/// Observed values win: missing resources are dropped from the state so
/// they get re-created, drifted resources take the observed config so the
/// next diff corrects them, and desired resources that already exist are
/// adopted instead of created twice.
pub fn refresh(
    state: &mut GlobalState,
    provider: &str,
    observed: &ProviderState,
    desired: &ResourceSet,
) -> RefreshReport {
    let mut report = RefreshReport::default();

    let recorded: Vec<String> = state
        .get_provider_resources(provider)
        .into_iter()
        .map(|(key, _)| key.clone())
        .collect();

    for key in recorded {
        match observed.get(&key) {
            None => {
                tracing::warn!(resource = %key, "Resource no longer exists at the provider");
                state.remove_resource(&key);
                report.missing.push(key);
            }
            Some(actual) => {
                let drifted = state
                    .get_resource(&key)
                    .is_some_and(|r| r.config != actual.config);
                if drifted {
                    tracing::warn!(resource = %key, "Resource drifted from recorded state");
                    report.drifted.push(key.clone());
                }
                state.set_resource(key, actual.clone());
            }
        }
    }

    for (key, actual) in observed.iter() {
        if state.get_resource(key).is_none() && desired.contains_key(key) {
            tracing::info!(resource = %key, "Adopting existing resource into state");
            state.set_resource(key.clone(), actual.clone());
            report.adopted.push(key.clone());
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;
    use serde_json::json;

    fn bucket(id: &str, name: &str) -> ResourceConfig {
        ResourceConfig::new("bucket", id, "test", json!({ "bucket_name": name }))
            .with_force_new(["bucket_name"])
    }

    fn recorded(config: &ResourceConfig) -> ResourceState {
        ResourceState::from_config(format!("{}-0001", config.resource_type), config)
    }

    #[test]
    fn test_added_changed_removed_unchanged() {
        let mut desired = ResourceSet::new();
        desired.add(bucket("a", "a"));
        desired.add(bucket("b", "b-renamed"));
        desired.add(bucket("c", "c"));

        let mut state = GlobalState::new();
        state.set_resource("bucket:b".to_string(), recorded(&bucket("b", "b")));
        state.set_resource("bucket:c".to_string(), recorded(&bucket("c", "c")));
        state.set_resource("bucket:d".to_string(), recorded(&bucket("d", "d")));

        let diffs = diff(&desired, &state);
        let kinds: Vec<(&str, DiffKind)> = diffs.iter().map(|d| (d.key.as_str(), d.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("bucket:a", DiffKind::Added),
                ("bucket:b", DiffKind::Changed),
                ("bucket:c", DiffKind::Unchanged),
                ("bucket:d", DiffKind::Removed),
            ]
        );
        assert!(diffs[1].requires_replacement);
        assert_eq!(diffs[1].changes[0].path, "bucket_name");
    }

    #[test]
    fn test_nested_changes_have_dotted_paths() {
        let before = json!({ "scaling": { "min": 1, "max": 1 }, "disk": 50 });
        let after = json!({ "scaling": { "min": 1, "max": 3 }, "tags": ["a"] , "disk": 50 });

        let changes = diff_config(&before, &after);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "scaling.max");
        assert_eq!(changes[0].before, Some(json!(1)));
        assert_eq!(changes[0].after, Some(json!(3)));
        assert_eq!(changes[1].path, "tags");
        assert_eq!(changes[1].before, None);
    }

    #[test]
    fn test_in_place_change_does_not_force_replacement() {
        let desired_config = ResourceConfig::new(
            "nodegroup",
            "workers",
            "test",
            json!({ "cluster": "dev", "scaling": { "desired": 2 } }),
        )
        .with_force_new(["cluster"]);
        let mut old = desired_config.clone();
        old.config = json!({ "cluster": "dev", "scaling": { "desired": 1 } });

        let mut desired = ResourceSet::new();
        desired.add(desired_config);
        let mut state = GlobalState::new();
        state.set_resource("nodegroup:workers".to_string(), recorded(&old));

        let diffs = diff(&desired, &state);
        assert_eq!(diffs[0].kind, DiffKind::Changed);
        assert!(!diffs[0].requires_replacement);
    }

    #[test]
    fn test_refresh_drops_missing_and_takes_drift() {
        let mut state = GlobalState::new();
        state.set_resource("bucket:a".to_string(), recorded(&bucket("a", "a")));
        state.set_resource("bucket:b".to_string(), recorded(&bucket("b", "b")));

        let mut observed = ProviderState::new();
        observed.add("bucket:b".to_string(), recorded(&bucket("b", "b-manual")));
        observed.add("bucket:c".to_string(), recorded(&bucket("c", "c")));
        observed.add("bucket:x".to_string(), recorded(&bucket("x", "x")));

        let mut desired = ResourceSet::new();
        desired.add(bucket("b", "b"));
        desired.add(bucket("c", "c"));

        let report = refresh(&mut state, "test", &observed, &desired);
        assert_eq!(report.missing, vec!["bucket:a"]);
        assert_eq!(report.drifted, vec!["bucket:b"]);
        assert_eq!(report.adopted, vec!["bucket:c"]);

        // Unmanaged and undesired resources are left alone
        assert!(state.get_resource("bucket:x").is_none());

        let diffs = diff(&desired, &state);
        assert_eq!(diffs[0].kind, DiffKind::Changed);
        assert_eq!(diffs[1].kind, DiffKind::Unchanged);
    }

    #[test]
    fn test_refresh_ignores_other_providers() {
        let mut other = bucket("a", "a");
        other.provider = "other".to_string();

        let mut state = GlobalState::new();
        state.set_resource("bucket:a".to_string(), recorded(&other));

        let report = refresh(&mut state, "test", &ProviderState::new(), &ResourceSet::new());
        assert!(report.is_clean());
        assert!(state.get_resource("bucket:a").is_some());
    }
}
