//! KDLパーサー
//!
//! スタック定義のKDLファイルをパースします。
//! リソース種類ごとのパース処理は `resource` モジュールにあります。

mod resource;

use resource::{
    parse_bucket, parse_cluster, parse_instance_profile, parse_nodegroup, parse_role, string_arg,
};

use crate::error::{FlowError, Result};
use crate::model::Stack;
use kdl::KdlDocument;
use std::fs;
use std::path::Path;

/// KDLファイルをパースしてStackを生成
///
/// `stack` ノードで名前が指定されていない場合はファイル名（拡張子なし）を使う。
#[tracing::instrument(skip(path), fields(path = %path.as_ref().display()))]
pub fn load_stack_file<P: AsRef<Path>>(path: P) -> Result<Stack> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| FlowError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let stack = parse_stack_string(&content, name)?;
    tracing::info!(stack = %stack.name, resources = stack.len(), "Loaded stack file");
    Ok(stack)
}

/// KDL文字列をパース
pub fn parse_stack_string(content: &str, default_name: String) -> Result<Stack> {
    let doc: KdlDocument = content.parse()?;
    let mut stack = Stack::new(default_name);

    for node in doc.nodes() {
        match node.name().value() {
            "stack" => {
                if let Some(name) = string_arg(node) {
                    stack.name = name;
                }
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "description" => stack.description = string_arg(child),
                            "region" => stack.region = string_arg(child),
                            other => {
                                return Err(FlowError::InvalidConfig(format!(
                                    "stack: 不明な設定項目 '{}'",
                                    other
                                )));
                            }
                        }
                    }
                }
            }
            "bucket" => {
                stack.add(parse_bucket(node)?)?;
            }
            "role" => {
                stack.add(parse_role(node)?)?;
            }
            "instance-profile" | "instance_profile" => {
                stack.add(parse_instance_profile(node)?)?;
            }
            "cluster" => {
                // クラスタ内に書かれたノードグループはそのクラスタに属する
                let (cluster, nodegroups) = parse_cluster(node)?;
                stack.add(cluster)?;
                for nodegroup in nodegroups {
                    stack.add(nodegroup)?;
                }
            }
            "nodegroup" | "node-group" | "node_group" => {
                stack.add(parse_nodegroup(node, None)?)?;
            }
            other => {
                tracing::debug!(node = %other, "Skipping unknown top-level node");
            }
        }
    }

    Ok(stack)
}

#[cfg(test)]
mod tests;
