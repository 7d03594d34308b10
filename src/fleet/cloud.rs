//! Cloud instance API (DigitalOcean v2 droplets)

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::FleetError;

/// Create request for one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub ssh_keys: Vec<String>,
    pub tags: Vec<String>,
    /// Boot script run once by cloud-init
    pub user_data: String,
    pub monitoring: bool,
    pub ipv6: bool,
}

/// Cloud-side view of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: u64,
    /// `new`, `active`, `off`, `archive`
    pub status: String,
    pub public_ipv4: Option<String>,
}

impl Instance {
    /// Booted and reachable
    pub fn is_ready(&self) -> bool {
        self.status == "active" && self.public_ipv4.is_some()
    }
}

#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn create_instance(&self, request: &InstanceRequest) -> Result<Instance, FleetError>;

    async fn get_instance(&self, id: u64) -> Result<Instance, FleetError>;

    /// Succeeds once the provider confirms the instance is gone
    async fn delete_instance(&self, id: u64) -> Result<(), FleetError>;
}

#[derive(Debug, Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Debug, Deserialize)]
struct Droplet {
    id: u64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    networks: Networks,
}

#[derive(Debug, Default, Deserialize)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Debug, Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

impl From<Droplet> for Instance {
    fn from(d: Droplet) -> Self {
        let public_ipv4 = d
            .networks
            .v4
            .into_iter()
            .find(|n| n.kind == "public")
            .map(|n| n.ip_address);
        Self {
            id: d.id,
            status: d.status,
            public_ipv4,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
}

pub struct DigitalOceanClient {
    base_url: Url,
    token: String,
    client: reqwest::Client,
}

impl DigitalOceanClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, FleetError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FleetError::Config(format!("Invalid cloud API URL '{}': {}", base_url, e)))?;
        if token.is_empty() {
            return Err(FleetError::Config("Cloud API token is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FleetError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url,
            token: token.to_string(),
            client,
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn error_from(response: reqwest::Response) -> FleetError {
        let status = response.status();
        let body: ApiErrorBody = response.json().await.unwrap_or_default();
        FleetError::Cloud(format!("{} {}: {}", status.as_u16(), body.id, body.message))
    }

    async fn droplet(response: reqwest::Response) -> Result<Instance, FleetError> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let envelope: DropletEnvelope = response
            .json()
            .await
            .map_err(|e| FleetError::Cloud(format!("Malformed droplet response: {}", e)))?;
        Ok(envelope.droplet.into())
    }
}

#[async_trait]
impl CloudApi for DigitalOceanClient {
    async fn create_instance(&self, request: &InstanceRequest) -> Result<Instance, FleetError> {
        let response = self
            .client
            .post(self.url_for("/v2/droplets"))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(|e| FleetError::Cloud(format!("Create droplet failed: {}", e)))?;
        Self::droplet(response).await
    }

    async fn get_instance(&self, id: u64) -> Result<Instance, FleetError> {
        let response = self
            .client
            .get(self.url_for(&format!("/v2/droplets/{}", id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FleetError::Cloud(format!("Get droplet {} failed: {}", id, e)))?;
        Self::droplet(response).await
    }

    async fn delete_instance(&self, id: u64) -> Result<(), FleetError> {
        let response = self
            .client
            .delete(self.url_for(&format!("/v2/droplets/{}", id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FleetError::Cloud(format!("Delete droplet {} failed: {}", id, e)))?;
        // Already gone counts as deleted
        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::error_from(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_droplet_public_ipv4() {
        let json = r#"{"droplet":{"id":42,"status":"active","networks":{"v4":[
            {"ip_address":"10.0.0.2","type":"private"},
            {"ip_address":"203.0.113.7","type":"public"}]}}}"#;
        let envelope: DropletEnvelope = serde_json::from_str(json).unwrap();
        let instance: Instance = envelope.droplet.into();
        assert_eq!(instance.id, 42);
        assert_eq!(instance.public_ipv4.as_deref(), Some("203.0.113.7"));
        assert!(instance.is_ready());
    }

    #[test]
    fn test_new_droplet_is_not_ready() {
        let json = r#"{"droplet":{"id":1,"status":"new","networks":{"v4":[]}}}"#;
        let envelope: DropletEnvelope = serde_json::from_str(json).unwrap();
        let instance: Instance = envelope.droplet.into();
        assert!(instance.public_ipv4.is_none());
        assert!(!instance.is_ready());
    }

    #[test]
    fn test_rejects_empty_token() {
        assert!(matches!(
            DigitalOceanClient::new("https://api.digitalocean.com", "", Duration::from_secs(5)),
            Err(FleetError::Config(_))
        ));
    }
}
