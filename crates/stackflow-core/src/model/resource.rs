//! クラウドリソースモデル
//!
//! スタックで宣言できるリソース（バケット、ロール、インスタンスプロファイル、
//! クラスタ、ノードグループ）の定義

use super::KubernetesVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// リソースの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Bucket,
    Role,
    InstanceProfile,
    Cluster,
    Nodegroup,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Bucket,
        ResourceKind::Role,
        ResourceKind::InstanceProfile,
        ResourceKind::Cluster,
        ResourceKind::Nodegroup,
    ];

    /// スタックファイルおよびリソースキーで使う名前
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Bucket => "bucket",
            ResourceKind::Role => "role",
            ResourceKind::InstanceProfile => "instance-profile",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Nodegroup => "nodegroup",
        }
    }

    /// テンプレート上のリソースタイプ
    pub fn template_type(&self) -> &'static str {
        match self {
            ResourceKind::Bucket => "AWS::S3::Bucket",
            ResourceKind::Role => "AWS::IAM::Role",
            ResourceKind::InstanceProfile => "AWS::IAM::InstanceProfile",
            ResourceKind::Cluster => "AWS::EKS::Cluster",
            ResourceKind::Nodegroup => "AWS::EKS::Nodegroup",
        }
    }

    /// 変更時にリソースの作り直しが必要になる設定項目
    pub fn force_new_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Bucket => &["bucket_name"],
            ResourceKind::Role => &["role_name"],
            ResourceKind::InstanceProfile => &["instance_profile_name"],
            ResourceKind::Cluster => &["cluster_name"],
            ResourceKind::Nodegroup => &["cluster", "instance_types", "disk_size"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// オブジェクトストレージのバケット
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub bucket_name: String,
}

/// IAMロール
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub role_name: String,

    /// 信頼ポリシーのサービスプリンシパル（例: "ec2.amazonaws.com"）
    pub assumed_by: String,

    /// アタッチするマネージドポリシー名
    #[serde(default)]
    pub managed_policies: Vec<String>,
}

/// インスタンスプロファイル
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceProfileSpec {
    pub instance_profile_name: String,

    /// ロールの論理ID
    pub roles: Vec<String>,
}

/// マネージドKubernetesクラスタ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_name: String,
    pub version: KubernetesVersion,

    /// マスターロールの論理ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masters_role: Option<String>,

    /// デフォルトで作成されるワーカー数（0 の場合はノードグループのみ）
    pub default_capacity: u32,
}

impl ClusterSpec {
    pub const DEFAULT_CAPACITY: u32 = 2;
}

/// ワーカーノードグループ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroupSpec {
    /// 所属クラスタの論理ID
    pub cluster: String,
    pub instance_types: Vec<String>,

    /// ディスクサイズ (GiB)
    pub disk_size: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_size: u32,
}

impl NodeGroupSpec {
    pub const DEFAULT_INSTANCE_TYPE: &'static str = "t3.medium";
    pub const DEFAULT_DISK_SIZE: u32 = 20;

    /// デフォルト値でノードグループを作成
    pub fn for_cluster(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            instance_types: vec![Self::DEFAULT_INSTANCE_TYPE.to_string()],
            disk_size: Self::DEFAULT_DISK_SIZE,
            min_size: 1,
            max_size: 1,
            desired_size: 1,
        }
    }
}

/// リソース種類ごとの設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceSpec {
    Bucket(BucketSpec),
    Role(RoleSpec),
    InstanceProfile(InstanceProfileSpec),
    Cluster(ClusterSpec),
    Nodegroup(NodeGroupSpec),
}

/// 他リソースへの参照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    /// 参照している設定項目
    pub field: &'static str,
    /// 参照先の論理ID
    pub target: &'a str,
    /// 参照先に期待される種類
    pub expected: ResourceKind,
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Bucket(_) => ResourceKind::Bucket,
            ResourceSpec::Role(_) => ResourceKind::Role,
            ResourceSpec::InstanceProfile(_) => ResourceKind::InstanceProfile,
            ResourceSpec::Cluster(_) => ResourceKind::Cluster,
            ResourceSpec::Nodegroup(_) => ResourceKind::Nodegroup,
        }
    }

    /// プロバイダー上の名前（ノードグループは名前を持たない）
    pub fn physical_name(&self) -> Option<&str> {
        match self {
            ResourceSpec::Bucket(b) => Some(&b.bucket_name),
            ResourceSpec::Role(r) => Some(&r.role_name),
            ResourceSpec::InstanceProfile(p) => Some(&p.instance_profile_name),
            ResourceSpec::Cluster(c) => Some(&c.cluster_name),
            ResourceSpec::Nodegroup(_) => None,
        }
    }

    pub fn references(&self) -> Vec<Reference<'_>> {
        match self {
            ResourceSpec::Bucket(_) | ResourceSpec::Role(_) => Vec::new(),
            ResourceSpec::InstanceProfile(p) => p
                .roles
                .iter()
                .map(|r| Reference {
                    field: "roles",
                    target: r,
                    expected: ResourceKind::Role,
                })
                .collect(),
            ResourceSpec::Cluster(c) => c
                .masters_role
                .iter()
                .map(|r| Reference {
                    field: "masters_role",
                    target: r,
                    expected: ResourceKind::Role,
                })
                .collect(),
            ResourceSpec::Nodegroup(n) => vec![Reference {
                field: "cluster",
                target: &n.cluster,
                expected: ResourceKind::Cluster,
            }],
        }
    }
}

/// スタック内の1リソース
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// 論理ID（スタック内で一意）
    pub id: String,

    #[serde(flatten)]
    pub spec: ResourceSpec,

    /// 参照以外の明示的な依存先
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(id: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            id: id.into(),
            spec,
            depends_on: Vec::new(),
        }
    }

    pub fn with_depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// リソースキー（`kind:id`）
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind(), self.id)
    }

    pub fn references(&self) -> Vec<Reference<'_>> {
        self.spec.references()
    }

    /// 参照と明示的依存を合わせた依存先（重複なし、ソート済み）
    pub fn dependencies(&self) -> Vec<&str> {
        let deps: BTreeSet<&str> = self
            .references()
            .into_iter()
            .map(|r| r.target)
            .chain(self.depends_on.iter().map(String::as_str))
            .collect();
        deps.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodegroup_references_cluster() {
        let ng = Resource::new(
            "workers",
            ResourceSpec::Nodegroup(NodeGroupSpec::for_cluster("dev")),
        );
        let refs = ng.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target, "dev");
        assert_eq!(refs[0].expected, ResourceKind::Cluster);
        assert_eq!(ng.key(), "nodegroup:workers");
    }

    #[test]
    fn test_dependencies_are_deduplicated() {
        let profile = Resource::new(
            "profile",
            ResourceSpec::InstanceProfile(InstanceProfileSpec {
                instance_profile_name: "p".to_string(),
                roles: vec!["admin".to_string(), "admin".to_string()],
            }),
        )
        .with_depends_on("bucket")
        .with_depends_on("admin");

        assert_eq!(profile.dependencies(), vec!["admin", "bucket"]);
    }

    #[test]
    fn test_resource_serde_is_tagged() {
        let bucket = Resource::new(
            "data",
            ResourceSpec::Bucket(BucketSpec {
                bucket_name: "my-data".to_string(),
            }),
        );
        let json = serde_json::to_value(&bucket).unwrap();
        assert_eq!(json["kind"], "bucket");
        assert_eq!(json["bucket_name"], "my-data");
        assert!(json.get("depends_on").is_none());
    }
}
