//! Sandbox account store
//!
//! The simulated account lives in `.stackflow/sandbox.json` so that it
//! survives between CLI invocations. Every operation re-reads the file
//! under a lock and writes it back only when the operation succeeds.

use crate::error::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use stackflow_cloud::{CloudError, ResourceState};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

pub const ACCOUNT_FILE: &str = "sandbox.json";

/// Contents of the simulated account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    /// Source of physical ids, never reused
    pub counter: u64,

    /// Resources indexed by type:id
    pub resources: BTreeMap<String, ResourceState>,
}

impl Account {
    /// Allocate the next physical id for a resource type
    pub fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}-{:08x}", prefix, self.counter)
    }

    /// Resources that declare a dependency on `key`
    pub fn dependents_of(&self, key: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.depends_on.iter().any(|d| d == key))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

pub struct AccountStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AccountStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the account without modifying it
    pub async fn read(&self) -> Result<Account> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Modify the account; changes are persisted only when `f` succeeds
    pub async fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Account) -> std::result::Result<T, CloudError>,
    {
        let _guard = self.lock.lock().await;
        let mut account = self.load().await?;
        let value = f(&mut account)?;
        self.save(&account).await?;
        Ok(value)
    }

    async fn load(&self) -> Result<Account> {
        if !self.path.exists() {
            return Ok(Account::default());
        }
        let content = fs::read_to_string(&self.path).await?;
        serde_json::from_str(&content).map_err(|e| SandboxError::CorruptAccount {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    async fn save(&self, account: &Account) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(account)?;
        fs::write(&self.path, content).await?;
        tracing::debug!(
            path = %self.path.display(),
            resources = account.resources.len(),
            "Saved sandbox account"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_is_empty_account() {
        let dir = tempdir().unwrap();
        let store = AccountStore::new(dir.path().join(ACCOUNT_FILE));

        let account = store.read().await.unwrap();
        assert_eq!(account.counter, 0);
        assert!(account.resources.is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_is_not_persisted() {
        let dir = tempdir().unwrap();
        let store = AccountStore::new(dir.path().join(".stackflow").join(ACCOUNT_FILE));

        let id = store
            .update(|account| Ok(account.next_id("bkt")))
            .await
            .unwrap();
        assert_eq!(id, "bkt-00000001");

        let failed: Result<()> = store
            .update(|account| {
                account.next_id("bkt");
                Err(CloudError::InvalidConfig("nope".to_string()))
            })
            .await;
        assert!(failed.is_err());

        assert_eq!(store.read().await.unwrap().counter, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(ACCOUNT_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let store = AccountStore::new(&path);
        assert!(matches!(
            store.read().await,
            Err(SandboxError::CorruptAccount { .. })
        ));
    }
}
