//! 組み込みスタック
//!
//! 開発環境用のインフラ構成（バケット、EKS管理ロール、インスタンスプロファイル、
//! クラスタ、ノードグループ）をコードで宣言します。
//! 同じ構成を `stacks/infrastructure.kdl` でも提供しています。

use crate::error::Result;
use crate::model::{
    BucketSpec, ClusterSpec, InstanceProfileSpec, KubernetesVersion, NodeGroupSpec, RoleSpec,
    Stack,
};

pub const INFRASTRUCTURE_STACK_NAME: &str = "InfrastructureStack";

/// 組み込みのインフラスタックを構築
pub fn infrastructure_stack() -> Result<Stack> {
    let mut stack = Stack::new(INFRASTRUCTURE_STACK_NAME);

    stack.add_bucket(
        "bucket2",
        BucketSpec {
            bucket_name: "arcidan-bucket".to_string(),
        },
    )?;

    let eks_role = stack.add_role(
        "eksadmin",
        RoleSpec {
            role_name: "eks-cluster-role".to_string(),
            assumed_by: "ec2.amazonaws.com".to_string(),
            managed_policies: vec!["AdministratorAccess".to_string()],
        },
    )?;

    stack.add_instance_profile(
        "instanceprofile",
        InstanceProfileSpec {
            instance_profile_name: "eks-cluster-role".to_string(),
            roles: vec![eks_role.clone()],
        },
    )?;

    let cluster = stack.add_cluster(
        "dev",
        ClusterSpec {
            cluster_name: "dev-env".to_string(),
            version: KubernetesVersion::V1_28,
            masters_role: Some(eks_role),
            default_capacity: 0,
        },
    )?;

    stack.add_nodegroup(
        "eks-nodegroup",
        NodeGroupSpec {
            cluster,
            instance_types: vec!["t3.medium".to_string()],
            disk_size: 50,
            min_size: 1,
            max_size: 1,
            desired_size: 1,
        },
    )?;

    Ok(stack)
}
