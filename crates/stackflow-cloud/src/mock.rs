//! In-memory provider used by the engine tests

use crate::error::{CloudError, Result};
use crate::provider::{AuthStatus, CloudProvider, ResourceConfig};
use crate::state::{ProviderState, ResourceState, ResourceStatus};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MockProvider {
    resources: Mutex<BTreeMap<String, ResourceState>>,
    counter: Mutex<u32>,
    transient: Mutex<HashMap<String, u32>>,
    broken: Mutex<HashSet<String>>,
    /// `operation:key` pairs that fail once
    once: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    denied: AtomicBool,
}

/// Counts a call as in flight until dropped
struct InFlight<'a>(&'a MockProvider);

impl<'a> InFlight<'a> {
    fn enter(provider: &'a MockProvider) -> Self {
        let now = provider.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        provider.peak.fetch_max(now, Ordering::SeqCst);
        Self(provider)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` calls touching `key` fail with a retryable error
    pub fn fail_times(&self, key: &str, times: u32) {
        self.transient.lock().unwrap().insert(key.to_string(), times);
    }

    /// Every call touching `key` fails with a permanent error
    pub fn fail_always(&self, key: &str) {
        self.broken.lock().unwrap().insert(key.to_string());
    }

    /// The next `operation` call touching `key` fails with a permanent error
    pub fn fail_once(&self, operation: &str, key: &str) {
        self.once
            .lock()
            .unwrap()
            .insert(format!("{}:{}", operation, key));
    }

    /// Every create takes `latency` before it completes
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = Some(latency);
        self
    }

    /// Report the credentials as rejected
    pub fn deny_auth(&self) {
        self.denied.store(true, Ordering::SeqCst);
    }

    /// Most creates that were running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Calls made so far, as `operation:type:id`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resources.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.resources.lock().unwrap().len()
    }

    /// Change a resource behind the engine's back
    pub fn tamper(&self, key: &str, config: serde_json::Value) {
        if let Some(resource) = self.resources.lock().unwrap().get_mut(key) {
            resource.config = config;
        }
    }

    pub fn remove(&self, key: &str) {
        self.resources.lock().unwrap().remove(key);
    }

    fn record(&self, operation: &str, key: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", operation, key));

        if self.broken.lock().unwrap().contains(key)
            || self
                .once
                .lock()
                .unwrap()
                .remove(&format!("{}:{}", operation, key))
        {
            return Err(CloudError::InvalidConfig(format!("{} is broken", key)));
        }
        let mut transient = self.transient.lock().unwrap();
        if let Some(remaining) = transient.get_mut(key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(CloudError::ApiError(format!("{} is throttled", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn display_name(&self) -> &str {
        "Mock"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        if self.denied.load(Ordering::SeqCst) {
            return Ok(AuthStatus::failed("mock credentials rejected"));
        }
        Ok(AuthStatus::ok("mock"))
    }

    async fn get_state(&self) -> Result<ProviderState> {
        let mut state = ProviderState::new();
        for (key, resource) in self.resources.lock().unwrap().iter() {
            state.add(key.clone(), resource.clone());
        }
        Ok(state)
    }

    async fn create(&self, resource: &ResourceConfig) -> Result<ResourceState> {
        let key = resource.key();
        let _in_flight = InFlight::enter(self);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.record("create", &key)?;

        let mut resources = self.resources.lock().unwrap();
        if resources.contains_key(&key) {
            return Err(CloudError::ResourceAlreadyExists(key));
        }
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        let state = ResourceState::from_config(format!("mock-{:08x}", *counter), resource)
            .with_status(ResourceStatus::Running);
        resources.insert(key, state.clone());
        Ok(state)
    }

    async fn update(
        &self,
        resource: &ResourceConfig,
        current: &ResourceState,
    ) -> Result<ResourceState> {
        let key = resource.key();
        self.record("update", &key)?;

        let mut resources = self.resources.lock().unwrap();
        if !resources.contains_key(&key) {
            return Err(CloudError::ResourceNotFound(key));
        }
        let mut state = ResourceState::from_config(current.id.clone(), resource)
            .with_status(ResourceStatus::Running);
        state.created_at = current.created_at;
        resources.insert(key, state.clone());
        Ok(state)
    }

    async fn delete(&self, current: &ResourceState) -> Result<()> {
        let key = current.key();
        self.record("delete", &key)?;

        let mut resources = self.resources.lock().unwrap();
        let dependents: Vec<&str> = resources
            .iter()
            .filter(|(_, r)| r.depends_on.contains(&key))
            .map(|(k, _)| k.as_str())
            .collect();
        if !dependents.is_empty() {
            return Err(CloudError::DependencyViolation(format!(
                "{} is still used by {}",
                key,
                dependents.join(", ")
            )));
        }
        resources
            .remove(&key)
            .map(|_| ())
            .ok_or(CloudError::ResourceNotFound(key))
    }
}
