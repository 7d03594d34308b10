//! Local records: subscriptions, usage ledger and provisioned servers
//!
//! Services only see the traits. `StateStore` keeps everything in memory and
//! optionally mirrors it to a JSON state file.

mod state;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::fleet::ProvisionStatus;

pub use state::{StateStore, STATE_FILE};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Plan limits applied to every identity of a subscription
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Concurrent devices / IPs, 0 means unlimited
    pub max_devices: u32,
    /// Traffic cap in bytes, 0 means unlimited
    pub traffic_limit_bytes: u64,
}

/// Usage counters last pulled from the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrafficUsage {
    pub up: u64,
    pub down: u64,
    pub total: u64,
}

/// A subscriber's entitlement on one panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub owner_id: String,
    pub owner_email: String,
    pub panel_id: String,
    pub active: bool,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub limits: PlanLimits,
    /// Panel client id; may drift from what the panel holds
    #[serde(default)]
    pub client_id: Option<String>,
    /// Identity email of the first inbound the client was attached to
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub usage: TrafficUsage,
    #[serde(default)]
    pub last_traffic_sync: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        owner_email: impl Into<String>,
        panel_id: impl Into<String>,
        end_date: DateTime<Utc>,
        limits: PlanLimits,
    ) -> Self {
        let id = id.into();
        Self {
            owner_id: id.clone(),
            id,
            owner_email: owner_email.into(),
            panel_id: panel_id.into(),
            active: true,
            end_date,
            limits,
            client_id: None,
            client_email: None,
            usage: TrafficUsage::default(),
            last_traffic_sync: None,
        }
    }
}

/// Immutable usage sample appended on every sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    pub subscription_id: String,
    pub inbound_id: i64,
    pub email: String,
    pub up: u64,
    pub down: u64,
    pub total: u64,
    pub reset_count: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Edge server managed (or merely tracked) by the fleet orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedServer {
    pub id: String,
    pub name: String,
    pub location: String,
    pub region: Option<String>,
    pub size: Option<String>,
    pub status: ProvisionStatus,
    /// Cloud resource id
    pub instance_id: Option<u64>,
    /// Public address once known
    pub host: Option<String>,
    /// Routing tag for outbound selection
    pub outbound_tag: Option<String>,
    pub active: bool,
    pub auto_provision: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn subscription(&self, id: &str) -> StoreResult<Option<Subscription>>;

    /// Active subscriptions bound to a panel
    async fn active_subscriptions(&self, panel_id: &str) -> StoreResult<Vec<Subscription>>;

    async fn save_subscription(&self, subscription: &Subscription) -> StoreResult<()>;

    /// Save several records in one write
    async fn save_subscriptions(&self, subscriptions: &[Subscription]) -> StoreResult<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a pass worth of samples in one write
    async fn append_samples(&self, samples: Vec<UsageSample>) -> StoreResult<()>;

    async fn samples(&self, subscription_id: &str) -> StoreResult<Vec<UsageSample>>;
}

#[async_trait]
pub trait ServerStore: Send + Sync {
    async fn server(&self, id: &str) -> StoreResult<Option<ProvisionedServer>>;

    async fn servers(&self) -> StoreResult<Vec<ProvisionedServer>>;

    async fn save_server(&self, server: &ProvisionedServer) -> StoreResult<()>;

    async fn delete_server(&self, id: &str) -> StoreResult<()>;

    /// Stamp `last_health_check` on the stored record, leaving every other
    /// field alone. `false` when the record no longer exists.
    async fn touch_health(&self, id: &str, at: DateTime<Utc>) -> StoreResult<bool>;
}
