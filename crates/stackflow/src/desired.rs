//! スタックの読み込みと desired state への変換

use anyhow::Context;
use stackflow_cloud::{ResourceConfig, ResourceSet};
use stackflow_config::ConfigError;
use stackflow_core::{Stack, infrastructure_stack, load_stack_file};
use std::path::PathBuf;

/// スタックの読み込み元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackSource {
    /// `-f` で指定されたファイル
    File(PathBuf),
    /// `--builtin`
    Builtin,
    /// スタックファイルを自動検出し、無ければ組み込みスタック
    Discover,
}

pub struct LoadedStack {
    pub stack: Stack,
    /// 表示用の読み込み元
    pub origin: String,
}

impl StackSource {
    pub fn resolve(file: Option<PathBuf>, builtin: bool) -> Self {
        match (file, builtin) {
            (Some(path), _) => Self::File(path),
            (None, true) => Self::Builtin,
            (None, false) => Self::Discover,
        }
    }

    pub fn load(&self) -> anyhow::Result<LoadedStack> {
        match self {
            Self::File(path) => load_file(path.clone()),
            Self::Builtin => load_builtin(),
            Self::Discover => match stackflow_config::find_stack_file() {
                Ok(path) => load_file(path),
                Err(ConfigError::StackFileNotFound) => {
                    tracing::debug!("No stack file found, using the built-in stack");
                    load_builtin()
                }
                Err(e) => Err(e.into()),
            },
        }
    }
}

fn load_file(path: PathBuf) -> anyhow::Result<LoadedStack> {
    let stack = load_stack_file(&path)
        .with_context(|| format!("スタックファイルを読み込めません: {}", path.display()))?;
    Ok(LoadedStack {
        stack,
        origin: path.display().to_string(),
    })
}

fn load_builtin() -> anyhow::Result<LoadedStack> {
    Ok(LoadedStack {
        stack: infrastructure_stack()?,
        origin: "(組み込み)".to_string(),
    })
}

/// スタックをプロバイダーに渡すリソース集合へ変換
///
/// 設定はリソース種類ごとの項目をそのまま JSON にしたもの（`kind` タグは除く）。
/// 依存先は論理IDからリソースキーに置き換える。
pub fn to_resource_set(stack: &Stack, provider: &str) -> anyhow::Result<ResourceSet> {
    let mut set = ResourceSet::named(stack.name.clone());

    for resource in stack.iter() {
        let kind = resource.kind();
        let mut config = serde_json::to_value(&resource.spec)?;
        if let Some(fields) = config.as_object_mut() {
            fields.remove("kind");
        }

        let mut desired = ResourceConfig::new(kind.as_str(), &resource.id, provider, config)
            .with_force_new(kind.force_new_fields().iter().copied());

        for dependency in resource.dependencies() {
            let target = stack.get(dependency).with_context(|| {
                format!(
                    "{} が存在しないリソース '{}' に依存しています",
                    resource.key(),
                    dependency
                )
            })?;
            desired = desired.with_depends_on(target.key());
        }

        set.add(desired);
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_core::{BucketSpec, INFRASTRUCTURE_STACK_NAME};

    #[test]
    fn test_builtin_stack_becomes_five_resources() {
        let stack = infrastructure_stack().unwrap();
        let set = to_resource_set(&stack, "sandbox").unwrap();

        assert_eq!(set.stack.as_deref(), Some(INFRASTRUCTURE_STACK_NAME));
        assert_eq!(set.len(), 5);
        assert!(set.iter().all(|r| r.provider == "sandbox"));

        let bucket = set.get_by_key("bucket:bucket2").unwrap();
        assert_eq!(
            bucket.get_config::<String>("bucket_name").as_deref(),
            Some("arcidan-bucket")
        );
        assert!(bucket.config.get("kind").is_none());
        assert_eq!(bucket.force_new, vec!["bucket_name".to_string()]);
    }

    #[test]
    fn test_dependencies_are_resource_keys() {
        let stack = infrastructure_stack().unwrap();
        let set = to_resource_set(&stack, "sandbox").unwrap();

        let profile = set.get_by_key("instance-profile:instanceprofile").unwrap();
        assert_eq!(profile.depends_on, vec!["role:eksadmin".to_string()]);

        let cluster = set.get_by_key("cluster:dev").unwrap();
        assert_eq!(cluster.depends_on, vec!["role:eksadmin".to_string()]);
        assert_eq!(cluster.get_config::<String>("version").as_deref(), Some("1.28"));

        let nodegroup = set.get_by_key("nodegroup:eks-nodegroup").unwrap();
        assert_eq!(nodegroup.depends_on, vec!["cluster:dev".to_string()]);
        assert_eq!(nodegroup.get_config::<u32>("disk_size"), Some(50));
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let mut stack = Stack::new("broken");
        stack
            .add(
                stackflow_core::Resource::new(
                    "logs",
                    stackflow_core::ResourceSpec::Bucket(BucketSpec {
                        bucket_name: "logs".to_string(),
                    }),
                )
                .with_depends_on("missing"),
            )
            .unwrap();

        let err = to_resource_set(&stack, "sandbox").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_source_resolution() {
        assert_eq!(
            StackSource::resolve(Some(PathBuf::from("a.kdl")), false),
            StackSource::File(PathBuf::from("a.kdl"))
        );
        assert_eq!(StackSource::resolve(None, true), StackSource::Builtin);
        assert_eq!(StackSource::resolve(None, false), StackSource::Discover);
    }
}
