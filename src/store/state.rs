//! In-memory store mirrored to a JSON state file

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::{
    LedgerStore, ProvisionedServer, ServerStore, StoreResult, Subscription, SubscriptionStore,
    UsageSample,
};
use crate::error::StoreError;
use crate::logger::log;

/// State file name
pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateData {
    #[serde(default)]
    subscriptions: BTreeMap<String, Subscription>,
    #[serde(default)]
    samples: Vec<UsageSample>,
    #[serde(default)]
    servers: BTreeMap<String, ProvisionedServer>,
}

/// Store backed by memory, optionally persisted after every write
pub struct StateStore {
    path: Option<PathBuf>,
    data: RwLock<StateData>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StateStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(StateData::default()),
        }
    }

    /// Load `path` if it exists, otherwise start empty. A corrupt file is an
    /// error rather than a silent reset.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let data: StateData = serde_json::from_str(&content)?;
            log::info!(path = %path.display(), "Loaded state from file");
            data
        } else {
            StateData::default()
        };
        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write through a temp file so a crash never leaves half a file
    fn persist(&self, data: &StateData) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                log::info!(path = %dir.display(), "Creating data directory");
                std::fs::create_dir_all(dir)?;
            }
        }
        let content = serde_json::to_string_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        log::debug!(path = %path.display(), "Saved state to file");
        Ok(())
    }

    /// All subscriptions, any panel
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.data.read().await.subscriptions.values().cloned().collect()
    }
}

#[async_trait]
impl SubscriptionStore for StateStore {
    async fn subscription(&self, id: &str) -> StoreResult<Option<Subscription>> {
        Ok(self.data.read().await.subscriptions.get(id).cloned())
    }

    async fn active_subscriptions(&self, panel_id: &str) -> StoreResult<Vec<Subscription>> {
        Ok(self
            .data
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| s.active && s.panel_id == panel_id)
            .cloned()
            .collect())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        self.persist(&data)
    }

    async fn save_subscriptions(&self, subscriptions: &[Subscription]) -> StoreResult<()> {
        if subscriptions.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write().await;
        for subscription in subscriptions {
            data.subscriptions
                .insert(subscription.id.clone(), subscription.clone());
        }
        self.persist(&data)
    }
}

#[async_trait]
impl LedgerStore for StateStore {
    async fn append_samples(&self, samples: Vec<UsageSample>) -> StoreResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write().await;
        data.samples.extend(samples);
        self.persist(&data)
    }

    async fn samples(&self, subscription_id: &str) -> StoreResult<Vec<UsageSample>> {
        Ok(self
            .data
            .read()
            .await
            .samples
            .iter()
            .filter(|s| s.subscription_id == subscription_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ServerStore for StateStore {
    async fn server(&self, id: &str) -> StoreResult<Option<ProvisionedServer>> {
        Ok(self.data.read().await.servers.get(id).cloned())
    }

    async fn servers(&self) -> StoreResult<Vec<ProvisionedServer>> {
        Ok(self.data.read().await.servers.values().cloned().collect())
    }

    async fn save_server(&self, server: &ProvisionedServer) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.servers.insert(server.id.clone(), server.clone());
        self.persist(&data)
    }

    async fn delete_server(&self, id: &str) -> StoreResult<()> {
        let mut data = self.data.write().await;
        if data.servers.remove(id).is_none() {
            return Err(StoreError::not_found("server", id));
        }
        self.persist(&data)
    }

    async fn touch_health(&self, id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut data = self.data.write().await;
        let Some(server) = data.servers.get_mut(id) else {
            return Ok(false);
        };
        server.last_health_check = Some(at);
        self.persist(&data)?;
        Ok(true)
    }
}
