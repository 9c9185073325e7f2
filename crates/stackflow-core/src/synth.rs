//! テンプレート合成
//!
//! スタックを CloudFormation 形式のデプロイテンプレートに変換します。
//! 出力は決定的で、同じスタックからは常にバイト単位で同じ JSON が得られます。

use crate::error::Result;
use crate::model::{Resource, ResourceKind, ResourceSpec, Stack};
use crate::validate::validate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// 合成されたデプロイテンプレート
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(
        rename = "Description",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,

    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, TemplateResource>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, TemplateOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties")]
    pub properties: Value,

    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateOutput {
    #[serde(rename = "Value")]
    pub value: Value,

    #[serde(
        rename = "Description",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
}

impl Template {
    /// 整形済み JSON（キーはソート済み）
    pub fn to_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// 指定タイプのリソースを論理ID順に返す
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<(&str, &TemplateResource)> {
        self.resources
            .iter()
            .filter(|(_, r)| r.resource_type == resource_type)
            .map(|(id, r)| (id.as_str(), r))
            .collect()
    }
}

/// スタックを検証してテンプレートを合成
#[tracing::instrument(skip(stack), fields(stack = %stack.name))]
pub fn synthesize(stack: &Stack) -> Result<Template> {
    validate(stack)?;

    let mut resources = BTreeMap::new();
    let mut outputs = BTreeMap::new();

    for resource in stack.iter() {
        let mut output = None;
        let properties = match &resource.spec {
            ResourceSpec::Bucket(bucket) => {
                output = Some(TemplateOutput {
                    value: reference(&resource.id),
                    description: Some(format!("{} のバケット名", resource.id)),
                });
                json!({ "BucketName": bucket.bucket_name })
            }
            ResourceSpec::Role(role) => {
                output = Some(TemplateOutput {
                    value: get_arn(&resource.id),
                    description: Some(format!("{} のロールARN", resource.id)),
                });
                json!({
                    "RoleName": role.role_name,
                    "AssumeRolePolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Action": "sts:AssumeRole",
                            "Effect": "Allow",
                            "Principal": { "Service": role.assumed_by },
                        }],
                    },
                    "ManagedPolicyArns": role
                        .managed_policies
                        .iter()
                        .map(|p| managed_policy_arn(p))
                        .collect::<Vec<_>>(),
                })
            }
            ResourceSpec::InstanceProfile(profile) => json!({
                "InstanceProfileName": profile.instance_profile_name,
                "Roles": profile.roles.iter().map(|r| reference(r)).collect::<Vec<_>>(),
            }),
            ResourceSpec::Cluster(cluster) => {
                output = Some(TemplateOutput {
                    value: reference(&resource.id),
                    description: Some(format!("{} のクラスタ名", resource.id)),
                });
                let mut props = json!({
                    "Name": cluster.cluster_name,
                    "Version": cluster.version.to_string(),
                    "DefaultCapacity": cluster.default_capacity,
                });
                if let Some(role) = &cluster.masters_role {
                    props["MastersRoleArn"] = get_arn(role);
                }
                props
            }
            ResourceSpec::Nodegroup(ng) => json!({
                "ClusterName": reference(&ng.cluster),
                "InstanceTypes": ng.instance_types,
                "DiskSize": ng.disk_size,
                "ScalingConfig": {
                    "MinSize": ng.min_size,
                    "MaxSize": ng.max_size,
                    "DesiredSize": ng.desired_size,
                },
            }),
        };

        if let (Some(key), Some(output)) = (output_name(resource), output) {
            outputs.insert(key, output);
        }

        let mut depends_on = resource.depends_on.clone();
        depends_on.sort();
        depends_on.dedup();

        resources.insert(
            resource.id.clone(),
            TemplateResource {
                resource_type: resource.kind().template_type().to_string(),
                properties,
                depends_on,
            },
        );
    }

    tracing::debug!(resource_count = resources.len(), "Synthesized template");

    Ok(Template {
        format_version: TEMPLATE_FORMAT_VERSION.to_string(),
        description: stack.description.clone(),
        resources,
        outputs,
    })
}

fn reference(id: &str) -> Value {
    json!({ "Ref": id })
}

fn get_arn(id: &str) -> Value {
    json!({ "Fn::GetAtt": [id, "Arn"] })
}

fn managed_policy_arn(name: &str) -> String {
    format!("arn:aws:iam::aws:policy/{}", name)
}

/// リソースが出力するキー（出力の無い種類は None）
///
/// 記号を落とすため "a-b" と "a_b" は同じキーになる。重複は検証で弾く。
pub(crate) fn output_name(resource: &Resource) -> Option<String> {
    let suffix = match resource.kind() {
        ResourceKind::Bucket => "BucketName",
        ResourceKind::Role => "Arn",
        ResourceKind::Cluster => "ClusterName",
        ResourceKind::InstanceProfile | ResourceKind::Nodegroup => return None,
    };
    Some(output_key(&resource.id, suffix))
}

/// 論理IDから英数字のみの出力キーを作る（"eks-nodegroup" → "EksNodegroup"）
fn output_key(id: &str, suffix: &str) -> String {
    let mut key = String::with_capacity(id.len() + suffix.len());
    for part in id.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            key.push(first.to_ascii_uppercase());
            key.extend(chars);
        }
    }
    key.push_str(suffix);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::infrastructure_stack;
    use crate::error::FlowError;
    use crate::model::NodeGroupSpec;

    fn template() -> Template {
        synthesize(&infrastructure_stack().unwrap()).unwrap()
    }

    #[test]
    fn test_single_bucket_named_arcidan_bucket() {
        let template = template();
        let buckets = template.resources_of_type("AWS::S3::Bucket");
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].1.properties["BucketName"], "arcidan-bucket");
    }

    #[test]
    fn test_single_role_with_administrator_access() {
        let template = template();
        let roles = template.resources_of_type("AWS::IAM::Role");
        assert_eq!(roles.len(), 1);

        let props = &roles[0].1.properties;
        assert_eq!(props["RoleName"], "eks-cluster-role");
        assert_eq!(
            props["ManagedPolicyArns"],
            json!(["arn:aws:iam::aws:policy/AdministratorAccess"])
        );
        assert_eq!(
            props["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            "ec2.amazonaws.com"
        );
    }

    #[test]
    fn test_nodegroup_capacity() {
        let template = template();
        let groups = template.resources_of_type("AWS::EKS::Nodegroup");
        assert_eq!(groups.len(), 1);

        let props = &groups[0].1.properties;
        assert_eq!(props["ClusterName"], json!({ "Ref": "dev" }));
        assert_eq!(props["InstanceTypes"], json!(["t3.medium"]));
        assert_eq!(props["DiskSize"], 50);
        assert_eq!(props["ScalingConfig"]["MinSize"], 1);
        assert_eq!(props["ScalingConfig"]["MaxSize"], 1);
        assert_eq!(props["ScalingConfig"]["DesiredSize"], 1);
    }

    #[test]
    fn test_resynthesis_is_byte_identical() {
        let first = template().to_json().unwrap();
        let second = template().to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_instance_profile_references_declared_role() {
        let template = template();
        let profiles = template.resources_of_type("AWS::IAM::InstanceProfile");
        assert_eq!(profiles.len(), 1);

        let roles = template.resources_of_type("AWS::IAM::Role");
        let role_id = roles[0].0;
        assert_eq!(
            profiles[0].1.properties["Roles"],
            json!([{ "Ref": role_id }])
        );
    }

    #[test]
    fn test_cluster_masters_role_and_outputs() {
        let template = template();
        let cluster = &template.resources["dev"];
        assert_eq!(cluster.properties["Version"], "1.28");
        assert_eq!(cluster.properties["DefaultCapacity"], 0);
        assert_eq!(
            cluster.properties["MastersRoleArn"],
            json!({ "Fn::GetAtt": ["eksadmin", "Arn"] })
        );

        assert!(template.outputs.contains_key("Bucket2BucketName"));
        assert!(template.outputs.contains_key("EksadminArn"));
        assert!(template.outputs.contains_key("DevClusterName"));
    }

    #[test]
    fn test_invalid_stack_is_rejected() {
        let mut stack = Stack::new("broken");
        stack
            .add_nodegroup("workers", NodeGroupSpec::for_cluster("missing"))
            .unwrap();
        assert!(matches!(synthesize(&stack), Err(FlowError::Validation(_))));
    }

    #[test]
    fn test_output_key() {
        assert_eq!(output_key("eks-nodegroup", "Arn"), "EksNodegroupArn");
        assert_eq!(output_key("bucket2", "BucketName"), "Bucket2BucketName");
    }

    #[test]
    fn test_ids_with_same_output_key_are_rejected() {
        let mut stack = Stack::new("clash");
        for (id, name) in [("a-b", "first"), ("a_b", "second")] {
            stack
                .add_bucket(
                    id,
                    crate::model::BucketSpec {
                        bucket_name: name.to_string(),
                    },
                )
                .unwrap();
        }

        match synthesize(&stack) {
            Err(FlowError::Validation(problems)) => {
                assert_eq!(problems.len(), 1);
                assert!(problems[0].contains("ABBucketName"), "{:?}", problems);
            }
            other => panic!("expected a validation error, got {:?}", other),
        }
    }
}
