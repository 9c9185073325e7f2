//! State management for cloud resources
//!
//! Manages the `.stackflow/state.json` file which records the last known
//! state of every resource the engine has applied.

use crate::error::{CloudError, Result};
use crate::provider::{ResourceConfig, resource_key};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const STATE_DIR: &str = ".stackflow";
const STATE_VERSION: u32 = 1;
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Global state containing every managed resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file version
    pub version: u32,

    /// Incremented on every save
    #[serde(default)]
    pub serial: u64,

    /// Stack the state belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by type:id
    pub resources: BTreeMap<String, ResourceState>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            stack: None,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get resources for a specific provider
    pub fn get_provider_resources(&self, provider: &str) -> Vec<(&String, &ResourceState)> {
        self.resources
            .iter()
            .filter(|(_, r)| r.provider == provider)
            .collect()
    }

    /// Add or update a resource
    pub fn set_resource(&mut self, key: String, state: ResourceState) {
        self.resources.insert(key, state);
        self.updated_at = Utc::now();
    }

    /// Remove a resource
    pub fn remove_resource(&mut self, key: &str) -> Option<ResourceState> {
        let result = self.resources.remove(key);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    /// Get a resource by key
    pub fn get_resource(&self, key: &str) -> Option<&ResourceState> {
        self.resources.get(key)
    }
}

/// Resources as currently reported by a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderState {
    /// Resources indexed by type:id
    pub resources: BTreeMap<String, ResourceState>,
}

impl ProviderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: String, state: ResourceState) {
        self.resources.insert(key, state);
    }

    pub fn get(&self, key: &str) -> Option<&ResourceState> {
        self.resources.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ResourceState> {
        self.resources.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResourceState)> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// State of a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-specific resource ID
    pub id: String,

    /// Logical resource ID
    pub logical_id: String,

    /// Resource type
    pub resource_type: String,

    /// Provider that owns the resource
    pub provider: String,

    /// Current status
    pub status: ResourceStatus,

    /// Last applied configuration
    #[serde(default)]
    pub config: serde_json::Value,

    /// Keys of resources this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Resource attributes (ARN, endpoint, etc.)
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        logical_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            provider: String::new(),
            status: ResourceStatus::Unknown,
            config: serde_json::Value::Null,
            depends_on: Vec::new(),
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// State for a freshly applied resource
    pub fn from_config(id: impl Into<String>, resource: &ResourceConfig) -> Self {
        let mut state = Self::new(id, &resource.resource_type, &resource.id);
        state.provider = resource.provider.clone();
        state.config = resource.config.clone();
        state.depends_on = resource.depends_on.clone();
        state
    }

    /// Resource key (type:id)
    pub fn key(&self) -> String {
        resource_key(&self.resource_type, &self.logical_id)
    }

    /// Rebuild the configuration this state was applied from
    pub fn to_config(&self) -> ResourceConfig {
        ResourceConfig {
            resource_type: self.resource_type.clone(),
            id: self.logical_id.clone(),
            provider: self.provider.clone(),
            config: self.config.clone(),
            depends_on: self.depends_on.clone(),
            force_new: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
        self.updated_at = Utc::now();
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Running,
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ResourceStatus::Running => "running",
            ResourceStatus::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Reads and writes `<project_root>/.stackflow/state.json`
pub struct StateManager {
    dir: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            dir: project_root.as_ref().join(STATE_DIR),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.clone()
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
            tracing::debug!(dir = %self.dir.display(), "Created state directory");
        }
        Ok(())
    }

    /// Load the recorded state; a missing file is an empty state
    #[tracing::instrument(skip(self), fields(path = %self.state_path().display()))]
    pub async fn load(&self) -> Result<GlobalState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("No state file yet");
            return Ok(GlobalState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: GlobalState = serde_json::from_str(&content).map_err(|e| {
            CloudError::StateError(format!("{} is not a valid state file: {}", path.display(), e))
        })?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "state file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!(
            serial = state.serial,
            resources = state.resources.len(),
            "Loaded state"
        );
        Ok(state)
    }

    /// Write the state, keeping the previous file as `state.json.backup`
    ///
    /// The new content goes to a temporary file first and is renamed into
    /// place, so a crash never leaves a truncated state file behind.
    #[tracing::instrument(skip_all, fields(path = %self.state_path().display()))]
    pub async fn save(&self, state: &mut GlobalState) -> Result<()> {
        self.ensure_dir().await?;

        let path = self.state_path();
        if path.exists() {
            fs::copy(&path, self.dir.join(STATE_BACKUP)).await?;
        }

        state.serial += 1;
        state.updated_at = Utc::now();

        let staging = self.dir.join(format!("{}.tmp", STATE_FILE));
        fs::write(&staging, serde_json::to_string_pretty(state)?).await?;
        fs::rename(&staging, &path).await?;

        tracing::debug!(
            serial = state.serial,
            resources = state.resources.len(),
            "Saved state"
        );
        Ok(())
    }

    /// Take the cross-process lock on the state file
    ///
    /// A lock younger than [`LOCK_TTL_MINUTES`] is honoured; an older one is
    /// assumed to be left over from a crashed run and replaced.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_dir().await?;
        let path = self.dir.join(LOCK_FILE);

        if let Some(existing) = read_lock(&path).await? {
            let age = Utc::now().signed_duration_since(existing.acquired_at);
            if age < chrono::Duration::minutes(LOCK_TTL_MINUTES) {
                return Err(CloudError::LockError(format!(
                    "state is locked by {} since {}",
                    existing.holder, existing.acquired_at
                )));
            }
            tracing::warn!(holder = %existing.holder, "Replacing stale state lock");
            fs::remove_file(&path).await?;
        }

        let info = LockInfo {
            holder: lock_holder(),
            acquired_at: Utc::now(),
        };
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CloudError::LockError(
                    "state lock was taken by another process".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())
            .await?;
        file.flush().await?;

        tracing::debug!(holder = %info.holder, "Acquired state lock");
        Ok(StateLock {
            path,
            released: false,
        })
    }
}

pub const LOCK_TTL_MINUTES: i64 = 60;

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

async fn read_lock(path: &Path) -> Result<Option<LockInfo>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).await?;
    match serde_json::from_str(&content) {
        Ok(info) => Ok(Some(info)),
        Err(e) => {
            // An unreadable lock is treated as stale
            tracing::warn!(error = %e, "Unreadable state lock");
            Ok(Some(LockInfo {
                holder: "unknown".to_string(),
                acquired_at: DateTime::<Utc>::UNIX_EPOCH,
            }))
        }
    }
}

fn lock_holder() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!("pid {}@{}", std::process::id(), host)
}

/// Held while a process may write the state; removed on release or drop
pub struct StateLock {
    path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        if self.path.exists() {
            fs::remove_file(&self.path).await?;
            tracing::debug!("Released state lock");
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
