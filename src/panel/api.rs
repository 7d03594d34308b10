//! Panel operations the provisioning and reconciliation services depend on

use async_trait::async_trait;

use super::types::OnlineClient;
use crate::error::Result;
use crate::inbound::{Client, ClientStat, Inbound};

/// Operations on one panel
#[async_trait]
pub trait PanelApi: Send + Sync {
    /// Display name used in logs and results
    fn name(&self) -> &str;

    /// Every inbound, parsed and validated
    async fn list_inbounds(&self, use_cache: bool) -> Result<Vec<Inbound>>;

    async fn add_client(&self, inbound_id: i64, client: &Client) -> Result<()>;

    async fn update_client(&self, inbound_id: i64, client_id: &str, client: &Client) -> Result<()>;

    async fn delete_client(&self, inbound_id: i64, client_id: &str) -> Result<()>;

    async fn reset_client_traffic(&self, inbound_id: i64, email: &str) -> Result<()>;

    /// Live connections, normalized
    async fn online_clients(&self) -> Result<Vec<OnlineClient>>;

    async fn client_stats(&self, email: &str) -> Result<Option<ClientStat>>;
}
