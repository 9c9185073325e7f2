//! スタックの検証
//!
//! 問題は最初の1件で止めずにすべて収集して返します。

use crate::error::{FlowError, Result};
use crate::graph::ResourceGraph;
use crate::model::{ResourceKind, ResourceSpec, Stack};
use crate::synth::output_name;
use std::collections::HashMap;

/// スタックを検証し、問題があれば `FlowError::Validation` を返す
#[tracing::instrument(skip(stack), fields(stack = %stack.name, resources = stack.len()))]
pub fn validate(stack: &Stack) -> Result<()> {
    let problems = check(stack);
    if problems.is_empty() {
        tracing::debug!("Stack is valid");
        Ok(())
    } else {
        tracing::debug!(problem_count = problems.len(), "Stack has problems");
        Err(FlowError::Validation(problems))
    }
}

/// スタックの問題点を列挙
pub fn check(stack: &Stack) -> Vec<String> {
    let mut problems = Vec::new();

    if stack.name.trim().is_empty() {
        problems.push("スタック名が空です".to_string());
    }

    // 種類ごとの物理名の重複
    let mut names: HashMap<(ResourceKind, &str), &str> = HashMap::new();
    // テンプレートの出力キーの重複（記号だけが違う論理ID）
    let mut output_keys: HashMap<String, &str> = HashMap::new();

    for resource in stack.iter() {
        let label = resource.key();

        if resource.id.trim().is_empty() {
            problems.push("論理IDが空のリソースがあります".to_string());
        }

        if let Some(name) = resource.spec.physical_name() {
            if name.trim().is_empty() {
                problems.push(format!("{}: 名前が空です", label));
            } else if let Some(other) =
                names.insert((resource.kind(), name), resource.id.as_str())
            {
                problems.push(format!(
                    "{}: 名前 '{}' は {} と重複しています",
                    label, name, other
                ));
            }
        }

        if let Some(key) = output_name(resource)
            && let Some(other) = output_keys.insert(key.clone(), resource.id.as_str())
        {
            problems.push(format!(
                "{}: 出力キー '{}' は {} と重複しています",
                label, key, other
            ));
        }

        for reference in resource.references() {
            match stack.get(reference.target) {
                None => problems.push(format!(
                    "{}: {} が参照する '{}' が存在しません",
                    label, reference.field, reference.target
                )),
                Some(target) if target.kind() != reference.expected => {
                    problems.push(format!(
                        "{}: {} は {} を参照する必要がありますが '{}' は {} です",
                        label,
                        reference.field,
                        reference.expected,
                        reference.target,
                        target.kind()
                    ))
                }
                Some(_) => {}
            }
        }

        for dep in &resource.depends_on {
            if dep == &resource.id {
                problems.push(format!("{}: 自分自身に依存しています", label));
            } else if stack.get(dep).is_none() {
                problems.push(format!("{}: depends_on の '{}' が存在しません", label, dep));
            }
        }

        match &resource.spec {
            ResourceSpec::Role(role) => {
                if role.assumed_by.trim().is_empty() {
                    problems.push(format!("{}: assumed_by が空です", label));
                }
            }
            ResourceSpec::InstanceProfile(profile) => {
                if profile.roles.is_empty() {
                    problems.push(format!("{}: roles が指定されていません", label));
                }
            }
            ResourceSpec::Nodegroup(ng) => {
                if ng.instance_types.is_empty() {
                    problems.push(format!("{}: instance_types が指定されていません", label));
                }
                if ng.disk_size == 0 {
                    problems.push(format!("{}: disk_size は 1 以上である必要があります", label));
                }
                if ng.max_size == 0 {
                    problems.push(format!("{}: max_size は 1 以上である必要があります", label));
                }
                if ng.min_size > ng.desired_size || ng.desired_size > ng.max_size {
                    problems.push(format!(
                        "{}: min_size <= desired_size <= max_size を満たしていません (min={}, desired={}, max={})",
                        label, ng.min_size, ng.desired_size, ng.max_size
                    ));
                }
            }
            ResourceSpec::Bucket(_) | ResourceSpec::Cluster(_) => {}
        }
    }

    if let Err(e) = ResourceGraph::from_stack(stack).topological_order() {
        problems.push(e.to_string());
    }

    problems
}
