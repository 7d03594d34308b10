//! Wire types returned by panel endpoints

use serde::{Deserialize, Serialize};

/// Every panel answer is wrapped in `{success, msg, obj}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    pub obj: Option<T>,
}

impl<T> Envelope<T> {
    /// `Rejected` when the panel reported failure
    pub fn into_result(self) -> crate::error::Result<Option<T>> {
        if self.success {
            Ok(self.obj)
        } else {
            Err(crate::error::PanelError::Rejected(if self.msg.is_empty() {
                "unknown error".to_string()
            } else {
                self.msg
            }))
        }
    }
}

/// Live connection entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineClient {
    pub email: String,
    #[serde(default = "unknown")]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default = "unknown")]
    pub protocol: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "unknown")]
    pub source: String,
    #[serde(default)]
    pub reset: String,
}

fn unknown() -> String {
    "unknown".to_string()
}

impl OnlineClient {
    /// Entry synthesized from a bare email
    pub fn from_email(email: impl Into<String>) -> Self {
        let email = email.into();
        Self {
            user: email.clone(),
            email,
            ip: unknown(),
            port: 0,
            protocol: unknown(),
            source: unknown(),
            reset: String::new(),
        }
    }
}

/// The online endpoint answers with either bare emails or detailed entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OnlineReport {
    Emails(Vec<String>),
    Detailed(Vec<OnlineClient>),
}

impl OnlineReport {
    /// Normalize to one shape
    pub fn into_clients(self) -> Vec<OnlineClient> {
        match self {
            OnlineReport::Emails(emails) => emails.into_iter().map(OnlineClient::from_email).collect(),
            OnlineReport::Detailed(clients) => clients,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrayState {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetIo {
    #[serde(default)]
    pub up: u64,
    #[serde(default)]
    pub down: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetTraffic {
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub recv: u64,
}

/// Host metrics reported by the panel
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub mem: Usage,
    #[serde(default)]
    pub swap: Usage,
    #[serde(default)]
    pub disk: Usage,
    #[serde(default)]
    pub xray: XrayState,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub loads: Vec<f64>,
    #[serde(default)]
    pub tcp_count: u64,
    #[serde(default)]
    pub udp_count: u64,
    #[serde(default, rename = "netIO")]
    pub net_io: NetIo,
    #[serde(default)]
    pub net_traffic: NetTraffic,
}

impl ServerStatus {
    pub fn xray_running(&self) -> bool {
        self.xray.state == "running"
    }
}

/// Aggregate view over a panel's inbounds
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PanelSummary {
    pub inbounds: usize,
    pub enabled_inbounds: usize,
    pub clients: usize,
    pub expired_clients: usize,
    pub up: u64,
    pub down: u64,
}
