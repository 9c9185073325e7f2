//! リソースノードのパース

use crate::error::{FlowError, Result};
use crate::model::{
    BucketSpec, ClusterSpec, InstanceProfileSpec, KubernetesVersion, NodeGroupSpec, Resource,
    ResourceSpec, RoleSpec,
};
use kdl::KdlNode;

/// 最初の引数を文字列として取得
pub(super) fn string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// すべての文字列引数を取得
fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
        .collect()
}

fn u32_arg(node: &KdlNode, owner: &str) -> Result<u32> {
    let key = node.name().value();
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| {
            FlowError::InvalidConfig(format!("{}: {} には整数を指定してください", owner, key))
        })?;
    u32::try_from(value).map_err(|_| {
        FlowError::InvalidConfig(format!(
            "{}: {} の値 {} は範囲外です",
            owner, key, value
        ))
    })
}

fn required_string(node: &KdlNode, owner: &str) -> Result<String> {
    string_arg(node).ok_or_else(|| {
        FlowError::InvalidConfig(format!(
            "{}: {} には文字列を指定してください",
            owner,
            node.name().value()
        ))
    })
}

/// ノード名の引数（論理ID）を取得
fn logical_id(node: &KdlNode) -> Result<String> {
    string_arg(node).ok_or_else(|| {
        FlowError::InvalidConfig(format!("{} requires a name", node.name().value()))
    })
}

/// kebab-case と snake_case を同一視するため '-' を '_' に揃える
fn key_of(node: &KdlNode) -> String {
    node.name().value().replace('-', "_")
}

fn unknown_key(owner: &str, key: &str) -> FlowError {
    FlowError::InvalidConfig(format!("{}: 不明な設定項目 '{}'", owner, key))
}

fn missing(owner: &str, key: &str) -> FlowError {
    FlowError::InvalidConfig(format!("{}: {} が指定されていません", owner, key))
}

/// bucket ノードをパース
pub(super) fn parse_bucket(node: &KdlNode) -> Result<Resource> {
    let id = logical_id(node)?;
    let owner = format!("bucket:{}", id);
    let mut bucket_name = None;
    let mut depends_on = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match key_of(child).as_str() {
                "bucket_name" | "name" => bucket_name = Some(required_string(child, &owner)?),
                "depends_on" => depends_on.extend(string_args(child)),
                other => return Err(unknown_key(&owner, other)),
            }
        }
    }

    // 名前の省略時は論理IDを使う
    let spec = BucketSpec {
        bucket_name: bucket_name.unwrap_or_else(|| id.clone()),
    };
    Ok(Resource {
        id,
        spec: ResourceSpec::Bucket(spec),
        depends_on,
    })
}

/// role ノードをパース
pub(super) fn parse_role(node: &KdlNode) -> Result<Resource> {
    let id = logical_id(node)?;
    let owner = format!("role:{}", id);
    let mut role_name = None;
    let mut assumed_by = None;
    let mut managed_policies = Vec::new();
    let mut depends_on = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match key_of(child).as_str() {
                "role_name" | "name" => role_name = Some(required_string(child, &owner)?),
                "assumed_by" => assumed_by = Some(required_string(child, &owner)?),
                // 複数のポリシーを引数として受け取る
                "managed_policies" | "managed_policy" => {
                    managed_policies.extend(string_args(child))
                }
                "depends_on" => depends_on.extend(string_args(child)),
                other => return Err(unknown_key(&owner, other)),
            }
        }
    }

    let spec = RoleSpec {
        role_name: role_name.unwrap_or_else(|| id.clone()),
        assumed_by: assumed_by.ok_or_else(|| missing(&owner, "assumed-by"))?,
        managed_policies,
    };
    Ok(Resource {
        id,
        spec: ResourceSpec::Role(spec),
        depends_on,
    })
}

/// instance-profile ノードをパース
pub(super) fn parse_instance_profile(node: &KdlNode) -> Result<Resource> {
    let id = logical_id(node)?;
    let owner = format!("instance-profile:{}", id);
    let mut name = None;
    let mut roles = Vec::new();
    let mut depends_on = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match key_of(child).as_str() {
                "instance_profile_name" | "name" => name = Some(required_string(child, &owner)?),
                "roles" | "role" => roles.extend(string_args(child)),
                "depends_on" => depends_on.extend(string_args(child)),
                other => return Err(unknown_key(&owner, other)),
            }
        }
    }

    let spec = InstanceProfileSpec {
        instance_profile_name: name.unwrap_or_else(|| id.clone()),
        roles,
    };
    Ok(Resource {
        id,
        spec: ResourceSpec::InstanceProfile(spec),
        depends_on,
    })
}

/// cluster ノードをパース
///
/// 子に書かれた nodegroup ノードはこのクラスタに属するノードグループとして返す。
pub(super) fn parse_cluster(node: &KdlNode) -> Result<(Resource, Vec<Resource>)> {
    let id = logical_id(node)?;
    let owner = format!("cluster:{}", id);
    let mut cluster_name = None;
    let mut version = None;
    let mut masters_role = None;
    let mut default_capacity = ClusterSpec::DEFAULT_CAPACITY;
    let mut depends_on = Vec::new();
    let mut nodegroups = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match key_of(child).as_str() {
                "cluster_name" | "name" => cluster_name = Some(required_string(child, &owner)?),
                "version" => {
                    let raw = required_string(child, &owner)?;
                    version = Some(raw.parse::<KubernetesVersion>()?);
                }
                "masters_role" => masters_role = Some(required_string(child, &owner)?),
                "default_capacity" => default_capacity = u32_arg(child, &owner)?,
                "depends_on" => depends_on.extend(string_args(child)),
                "nodegroup" | "node_group" => {
                    nodegroups.push(parse_nodegroup(child, Some(&id))?);
                }
                other => return Err(unknown_key(&owner, other)),
            }
        }
    }

    let spec = ClusterSpec {
        cluster_name: cluster_name.unwrap_or_else(|| id.clone()),
        version: version.ok_or_else(|| missing(&owner, "version"))?,
        masters_role,
        default_capacity,
    };
    let cluster = Resource {
        id,
        spec: ResourceSpec::Cluster(spec),
        depends_on,
    };
    Ok((cluster, nodegroups))
}

/// nodegroup ノードをパース
///
/// `parent` はクラスタ内に書かれた場合のクラスタ論理ID。
/// 省略された容量は min=1, desired=min, max=max(desired, min) になる。
pub(super) fn parse_nodegroup(node: &KdlNode, parent: Option<&str>) -> Result<Resource> {
    let id = logical_id(node)?;
    let owner = format!("nodegroup:{}", id);
    let mut cluster = parent.map(str::to_string);
    let mut instance_types = Vec::new();
    let mut disk_size = NodeGroupSpec::DEFAULT_DISK_SIZE;
    let mut min_size = None;
    let mut max_size = None;
    let mut desired_size = None;
    let mut depends_on = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match key_of(child).as_str() {
                "cluster" => {
                    let named = required_string(child, &owner)?;
                    if let Some(parent) = parent
                        && parent != named
                    {
                        return Err(FlowError::InvalidConfig(format!(
                            "{}: クラスタ '{}' の中で別のクラスタ '{}' が指定されています",
                            owner, parent, named
                        )));
                    }
                    cluster = Some(named);
                }
                "instance_types" | "instance_type" => instance_types.extend(string_args(child)),
                "disk_size" => disk_size = u32_arg(child, &owner)?,
                "min_size" => min_size = Some(u32_arg(child, &owner)?),
                "max_size" => max_size = Some(u32_arg(child, &owner)?),
                "desired_size" => desired_size = Some(u32_arg(child, &owner)?),
                "depends_on" => depends_on.extend(string_args(child)),
                other => return Err(unknown_key(&owner, other)),
            }
        }
    }

    if instance_types.is_empty() {
        instance_types.push(NodeGroupSpec::DEFAULT_INSTANCE_TYPE.to_string());
    }
    let min_size = min_size.unwrap_or(1);
    let desired_size = desired_size.unwrap_or(min_size);
    let max_size = max_size.unwrap_or(desired_size.max(min_size));

    let spec = NodeGroupSpec {
        cluster: cluster.ok_or_else(|| missing(&owner, "cluster"))?,
        instance_types,
        disk_size,
        min_size,
        max_size,
        desired_size,
    };
    Ok(Resource {
        id,
        spec: ResourceSpec::Nodegroup(spec),
        depends_on,
    })
}
