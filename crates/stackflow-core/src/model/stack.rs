//! スタックモデル

use super::{
    BucketSpec, ClusterSpec, InstanceProfileSpec, NodeGroupSpec, Resource, ResourceKind,
    ResourceSpec, RoleSpec,
};
use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// デプロイ単位となるリソースの集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    /// スタック名
    pub name: String,

    /// 説明（テンプレートの Description になる）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// リージョン
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// 論理ID → リソース（論理ID順）
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// リソースを追加し、その論理IDを返す
    pub fn add(&mut self, resource: Resource) -> Result<String> {
        if self.resources.contains_key(&resource.id) {
            return Err(FlowError::DuplicateResource(resource.id));
        }
        let id = resource.id.clone();
        self.resources.insert(id.clone(), resource);
        Ok(id)
    }

    pub fn add_bucket(&mut self, id: impl Into<String>, spec: BucketSpec) -> Result<String> {
        self.add(Resource::new(id, ResourceSpec::Bucket(spec)))
    }

    pub fn add_role(&mut self, id: impl Into<String>, spec: RoleSpec) -> Result<String> {
        self.add(Resource::new(id, ResourceSpec::Role(spec)))
    }

    pub fn add_instance_profile(
        &mut self,
        id: impl Into<String>,
        spec: InstanceProfileSpec,
    ) -> Result<String> {
        self.add(Resource::new(id, ResourceSpec::InstanceProfile(spec)))
    }

    pub fn add_cluster(&mut self, id: impl Into<String>, spec: ClusterSpec) -> Result<String> {
        self.add(Resource::new(id, ResourceSpec::Cluster(spec)))
    }

    pub fn add_nodegroup(&mut self, id: impl Into<String>, spec: NodeGroupSpec) -> Result<String> {
        self.add(Resource::new(id, ResourceSpec::Nodegroup(spec)))
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn by_kind(&self, kind: ResourceKind) -> Vec<&Resource> {
        self.resources.values().filter(|r| r.kind() == kind).collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_duplicate_resource() {
        let mut stack = Stack::new("test");
        stack
            .add_bucket(
                "data",
                BucketSpec {
                    bucket_name: "a".to_string(),
                },
            )
            .unwrap();

        let result = stack.add_bucket(
            "data",
            BucketSpec {
                bucket_name: "b".to_string(),
            },
        );
        assert!(matches!(result, Err(FlowError::DuplicateResource(id)) if id == "data"));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_by_kind() {
        let mut stack = Stack::new("test");
        stack
            .add_bucket(
                "a",
                BucketSpec {
                    bucket_name: "a".to_string(),
                },
            )
            .unwrap();
        stack
            .add_nodegroup("workers", NodeGroupSpec::for_cluster("dev"))
            .unwrap();

        assert_eq!(stack.by_kind(ResourceKind::Bucket).len(), 1);
        assert_eq!(stack.by_kind(ResourceKind::Nodegroup).len(), 1);
        assert!(stack.by_kind(ResourceKind::Role).is_empty());
    }
}
