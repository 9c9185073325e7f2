//! Sandbox provider implementation

use crate::store::{ACCOUNT_FILE, Account, AccountStore};
use async_trait::async_trait;
use stackflow_cloud::{
    AuthStatus, CloudError, CloudProvider, ProviderState, ResourceConfig, ResourceState,
    ResourceStatus, STATE_DIR,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Account id used in every generated ARN
pub const SANDBOX_ACCOUNT_ID: &str = "123456789012";

const DEFAULT_REGION: &str = "us-east-1";

/// Instance types accepted for node groups
pub const KNOWN_INSTANCE_TYPES: &[&str] = &[
    "t3.micro",
    "t3.small",
    "t3.medium",
    "t3.large",
    "t3.xlarge",
    "m5.large",
    "m5.xlarge",
    "m5.2xlarge",
    "c5.large",
    "c5.xlarge",
    "r5.large",
];

/// Simulated cloud account backed by a local JSON file
pub struct SandboxProvider {
    store: AccountStore,
    region: String,
    failures: Mutex<HashMap<String, u32>>,
}

impl SandboxProvider {
    /// Sandbox for the project at `root` (`<root>/.stackflow/sandbox.json`)
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            store: AccountStore::new(root.as_ref().join(STATE_DIR).join(ACCOUNT_FILE)),
            region: DEFAULT_REGION.to_string(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account_path(&self) -> &Path {
        self.store.path()
    }

    /// Make the next `times` calls touching `key` fail with a retryable error
    pub fn fail_next(&self, key: impl Into<String>, times: u32) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(key.into(), times);
        }
    }

    fn injected_failure(&self, operation: &str, key: &str) -> stackflow_cloud::Result<()> {
        let Ok(mut failures) = self.failures.lock() else {
            return Ok(());
        };
        if let Some(remaining) = failures.get_mut(key)
            && *remaining > 0
        {
            *remaining -= 1;
            tracing::debug!(operation, resource = key, remaining = *remaining, "Injected failure");
            return Err(CloudError::ApiError(format!(
                "{} {}: request throttled",
                operation, key
            )));
        }
        Ok(())
    }

    fn arn(&self, resource: &ResourceConfig, name: &str, account: &Account, id: &str) -> String {
        match resource.resource_type.as_str() {
            "bucket" => format!("arn:aws:s3:::{}", name),
            "role" => format!("arn:aws:iam::{}:role/{}", SANDBOX_ACCOUNT_ID, name),
            "instance-profile" => format!(
                "arn:aws:iam::{}:instance-profile/{}",
                SANDBOX_ACCOUNT_ID, name
            ),
            "cluster" => format!(
                "arn:aws:eks:{}:{}:cluster/{}",
                self.region, SANDBOX_ACCOUNT_ID, name
            ),
            "nodegroup" => format!(
                "arn:aws:eks:{}:{}:nodegroup/{}/{}/{}",
                self.region,
                SANDBOX_ACCOUNT_ID,
                cluster_name(resource, account),
                resource.id,
                id
            ),
            other => format!(
                "arn:sandbox:{}:{}:{}/{}",
                self.region, SANDBOX_ACCOUNT_ID, other, name
            ),
        }
    }

    /// Build the recorded state for `resource` under physical id `id`
    fn materialize(&self, resource: &ResourceConfig, account: &Account, id: &str) -> ResourceState {
        let name = physical_name(resource).unwrap_or_else(|| resource.id.clone());
        let mut state = ResourceState::from_config(id, resource)
            .with_status(ResourceStatus::Running)
            .with_attribute("arn", serde_json::json!(self.arn(resource, &name, account, id)));

        match resource.resource_type.as_str() {
            "cluster" => state.set_attribute(
                "endpoint",
                serde_json::json!(format!(
                    "https://{}.{}.eks.sandbox.local",
                    id, self.region
                )),
            ),
            "nodegroup" => state.set_attribute("status", serde_json::json!("ACTIVE")),
            _ => {}
        }
        state
    }
}

/// Provider-side name of a resource, if its type has one
fn physical_name(resource: &ResourceConfig) -> Option<String> {
    let field = match resource.resource_type.as_str() {
        "bucket" => "bucket_name",
        "role" => "role_name",
        "instance-profile" => "instance_profile_name",
        "cluster" => "cluster_name",
        _ => return None,
    };
    resource.get_config::<String>(field)
}

fn cluster_name(resource: &ResourceConfig, account: &Account) -> String {
    let cluster = resource.get_config::<String>("cluster").unwrap_or_default();
    account
        .resources
        .get(&format!("cluster:{}", cluster))
        .and_then(|c| c.config.get("cluster_name"))
        .and_then(|n| n.as_str())
        .map(str::to_string)
        .unwrap_or(cluster)
}

fn id_prefix(resource_type: &str) -> &str {
    match resource_type {
        "bucket" => "bkt",
        "role" => "role",
        "instance-profile" => "ip",
        "cluster" => "eks",
        "nodegroup" => "ng",
        other => other,
    }
}

/// Checks shared by create and update
fn check_config(
    resource: &ResourceConfig,
    account: &Account,
    key: &str,
) -> stackflow_cloud::Result<()> {
    for dep in &resource.depends_on {
        if !account.resources.contains_key(dep) {
            return Err(CloudError::InvalidConfig(format!(
                "{} depends on {}, which does not exist",
                key, dep
            )));
        }
    }

    if let Some(name) = physical_name(resource) {
        if name.is_empty() {
            return Err(CloudError::InvalidConfig(format!("{} has an empty name", key)));
        }
        let taken = account.resources.iter().any(|(other_key, other)| {
            other_key != key
                && other.resource_type == resource.resource_type
                && physical_name(&other.to_config()).as_deref() == Some(name.as_str())
        });
        if taken {
            return Err(CloudError::ResourceAlreadyExists(format!(
                "{} named {}",
                resource.resource_type, name
            )));
        }
    }

    if resource.resource_type == "nodegroup" {
        let types = resource
            .get_config::<Vec<String>>("instance_types")
            .unwrap_or_default();
        if types.is_empty() {
            return Err(CloudError::InvalidConfig(format!(
                "{} has no instance types",
                key
            )));
        }
        if let Some(unknown) = types
            .iter()
            .find(|t| !KNOWN_INSTANCE_TYPES.contains(&t.as_str()))
        {
            return Err(CloudError::InvalidConfig(format!(
                "{}: unknown instance type {}",
                key, unknown
            )));
        }
    }

    Ok(())
}

#[async_trait]
impl CloudProvider for SandboxProvider {
    fn name(&self) -> &str {
        "sandbox"
    }

    fn display_name(&self) -> &str {
        "Local sandbox"
    }

    async fn check_auth(&self) -> stackflow_cloud::Result<AuthStatus> {
        // An unreadable account file is the sandbox's equivalent of bad credentials
        if let Err(e) = self.store.read().await {
            return Ok(AuthStatus::failed(e.to_string()));
        }
        Ok(AuthStatus::ok(format!(
            "sandbox account {} in {} ({})",
            SANDBOX_ACCOUNT_ID,
            self.region,
            self.store.path().display()
        )))
    }

    async fn get_state(&self) -> stackflow_cloud::Result<ProviderState> {
        let account = self.store.read().await?;
        let mut state = ProviderState::new();
        for (key, resource) in account.resources {
            state.add(key, resource);
        }
        Ok(state)
    }

    async fn create(&self, resource: &ResourceConfig) -> stackflow_cloud::Result<ResourceState> {
        let key = resource.key();
        self.injected_failure("create", &key)?;

        let created = self
            .store
            .update(|account| {
                if account.resources.contains_key(&key) {
                    return Err(CloudError::ResourceAlreadyExists(key.clone()));
                }
                check_config(resource, account, &key)?;

                let id = account.next_id(id_prefix(&resource.resource_type));
                let state = self.materialize(resource, account, &id);
                account.resources.insert(key.clone(), state.clone());
                Ok(state)
            })
            .await?;

        tracing::info!(resource = %key, id = %created.id, "Created sandbox resource");
        Ok(created)
    }

    async fn update(
        &self,
        resource: &ResourceConfig,
        current: &ResourceState,
    ) -> stackflow_cloud::Result<ResourceState> {
        let key = resource.key();
        self.injected_failure("update", &key)?;

        let updated = self
            .store
            .update(|account| {
                let existing = account
                    .resources
                    .get(&key)
                    .ok_or_else(|| CloudError::ResourceNotFound(key.clone()))?;
                if existing.id != current.id {
                    return Err(CloudError::ResourceNotFound(format!(
                        "{} ({})",
                        key, current.id
                    )));
                }
                let created_at = existing.created_at;
                check_config(resource, account, &key)?;

                let mut state = self.materialize(resource, account, &current.id);
                state.created_at = created_at;
                account.resources.insert(key.clone(), state.clone());
                Ok(state)
            })
            .await?;

        tracing::info!(resource = %key, id = %updated.id, "Updated sandbox resource");
        Ok(updated)
    }

    async fn delete(&self, current: &ResourceState) -> stackflow_cloud::Result<()> {
        let key = current.key();
        self.injected_failure("delete", &key)?;

        self.store
            .update(|account| {
                if !account.resources.contains_key(&key) {
                    return Err(CloudError::ResourceNotFound(key.clone()));
                }
                let dependents = account.dependents_of(&key);
                if !dependents.is_empty() {
                    return Err(CloudError::DependencyViolation(format!(
                        "{} is still used by {}",
                        key,
                        dependents.join(", ")
                    )));
                }
                account.resources.remove(&key);
                Ok(())
            })
            .await?;

        tracing::info!(resource = %key, id = %current.id, "Deleted sandbox resource");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn cluster() -> ResourceConfig {
        ResourceConfig::new(
            "cluster",
            "dev",
            "sandbox",
            json!({ "cluster_name": "dev-env", "version": "1.28", "default_capacity": 0 }),
        )
    }

    fn nodegroup(instance_type: &str) -> ResourceConfig {
        ResourceConfig::new(
            "nodegroup",
            "eks-nodegroup",
            "sandbox",
            json!({
                "cluster": "dev",
                "instance_types": [instance_type],
                "disk_size": 50,
                "min_size": 1,
                "max_size": 1,
                "desired_size": 1
            }),
        )
        .with_depends_on("cluster:dev")
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_attributes() {
        let dir = tempdir().unwrap();
        let provider = SandboxProvider::new(dir.path());

        let cluster = provider.create(&cluster()).await.unwrap();
        assert_eq!(cluster.id, "eks-00000001");
        assert_eq!(
            cluster.get_attribute::<String>("arn").unwrap(),
            "arn:aws:eks:us-east-1:123456789012:cluster/dev-env"
        );
        assert!(cluster.get_attribute::<String>("endpoint").is_some());

        let nodegroup = provider.create(&nodegroup("t3.medium")).await.unwrap();
        assert_eq!(nodegroup.id, "ng-00000002");
        assert_eq!(
            nodegroup.get_attribute::<String>("status").as_deref(),
            Some("ACTIVE")
        );
        assert!(
            nodegroup
                .get_attribute::<String>("arn")
                .unwrap()
                .contains("nodegroup/dev-env/eks-nodegroup/")
        );

        // A second provider instance sees the same account
        let reopened = SandboxProvider::new(dir.path());
        let state = reopened.get_state().await.unwrap();
        assert_eq!(state.len(), 2);
        assert!(state.get("nodegroup:eks-nodegroup").is_some());
        assert!(dir.path().join(".stackflow/sandbox.json").exists());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let dir = tempdir().unwrap();
        let provider = SandboxProvider::new(dir.path());
        provider.create(&cluster()).await.unwrap();

        assert!(matches!(
            provider.create(&cluster()).await,
            Err(CloudError::ResourceAlreadyExists(_))
        ));

        let mut same_name = cluster();
        same_name.id = "other".to_string();
        assert!(matches!(
            provider.create(&same_name).await,
            Err(CloudError::ResourceAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        let provider = SandboxProvider::new(dir.path());

        assert!(matches!(
            provider.create(&nodegroup("t3.medium")).await,
            Err(CloudError::InvalidConfig(_))
        ));

        provider.create(&cluster()).await.unwrap();
        assert!(matches!(
            provider.create(&nodegroup("x9.huge")).await,
            Err(CloudError::InvalidConfig(_))
        ));

        // Failed creates do not consume ids
        let created = provider.create(&nodegroup("t3.large")).await.unwrap();
        assert_eq!(created.id, "ng-00000002");
    }

    #[tokio::test]
    async fn test_update_keeps_identity() {
        let dir = tempdir().unwrap();
        let provider = SandboxProvider::new(dir.path());
        provider.create(&cluster()).await.unwrap();
        let before = provider.create(&nodegroup("t3.medium")).await.unwrap();

        let mut scaled = nodegroup("t3.medium");
        scaled.config["max_size"] = json!(3);
        let after = provider.update(&scaled, &before).await.unwrap();

        assert_eq!(after.id, before.id);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.config["max_size"], json!(3));

        let mut missing = before.clone();
        missing.logical_id = "nope".to_string();
        let mut config = scaled.clone();
        config.id = "nope".to_string();
        assert!(matches!(
            provider.update(&config, &missing).await,
            Err(CloudError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_refuses_while_dependents_exist() {
        let dir = tempdir().unwrap();
        let provider = SandboxProvider::new(dir.path());
        let cluster = provider.create(&cluster()).await.unwrap();
        let nodegroup = provider.create(&nodegroup("t3.medium")).await.unwrap();

        assert!(matches!(
            provider.delete(&cluster).await,
            Err(CloudError::DependencyViolation(_))
        ));

        provider.delete(&nodegroup).await.unwrap();
        provider.delete(&cluster).await.unwrap();
        assert!(provider.get_state().await.unwrap().is_empty());

        assert!(matches!(
            provider.delete(&cluster).await,
            Err(CloudError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_next_injects_retryable_errors() {
        let dir = tempdir().unwrap();
        let provider = SandboxProvider::new(dir.path());
        provider.fail_next("cluster:dev", 2);

        for _ in 0..2 {
            let err = provider.create(&cluster()).await.unwrap_err();
            assert!(err.is_retryable());
        }
        assert!(provider.create(&cluster()).await.is_ok());
    }

    #[tokio::test]
    async fn test_check_auth() {
        let dir = tempdir().unwrap();
        let provider = SandboxProvider::new(dir.path());
        let auth = provider.check_auth().await.unwrap();
        assert!(auth.authenticated);
        assert!(auth.account_info.unwrap().contains("us-east-1"));
    }

    #[tokio::test]
    async fn test_corrupt_account_fails_auth() {
        let dir = tempdir().unwrap();
        let provider = SandboxProvider::new(dir.path()).with_region("eu-west-1");
        std::fs::create_dir_all(provider.account_path().parent().unwrap()).unwrap();
        std::fs::write(provider.account_path(), "{ not json").unwrap();

        let auth = provider.check_auth().await.unwrap();
        assert!(!auth.authenticated);
        assert!(auth.error.is_some());
    }
}
