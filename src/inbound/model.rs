//! Typed inbound, client and statistics records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::stream::StreamSettings;

/// Inbound protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
    #[serde(rename = "dokodemo-door")]
    DokodemoDoor,
    Socks,
    Http,
    Wireguard,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::DokodemoDoor => "dokodemo-door",
            Protocol::Socks => "socks",
            Protocol::Http => "http",
            Protocol::Wireguard => "wireguard",
        }
    }

    /// Protocols whose clients are keyed by a UUID
    pub fn uses_uuid_clients(&self) -> bool {
        matches!(self, Protocol::Vmess | Protocol::Vless)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Telegram id arrives either as a string or a number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelegramId {
    Number(i64),
    Text(String),
}

/// Client attached to an inbound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    #[serde(default)]
    pub id: String,
    /// Trojan / shadowsocks credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub flow: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub limit_ip: u32,
    /// Traffic cap in GB, 0 means unlimited
    #[serde(default, rename = "totalGB")]
    pub total_gb: u64,
    /// Expiry as epoch milliseconds, 0 means never
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tg_id: Option<TelegramId>,
    #[serde(default)]
    pub sub_id: String,
    #[serde(default)]
    pub reset: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// VMess cipher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Client {
    /// Minimal enabled client
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            password: None,
            flow: String::new(),
            email: email.into(),
            limit_ip: 0,
            total_gb: 0,
            expiry_time: 0,
            enable: true,
            tg_id: None,
            sub_id: String::new(),
            reset: 0,
            comment: None,
            security: None,
        }
    }
}

/// Per-client counters embedded in an inbound
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStat {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub inbound_id: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub up: u64,
    #[serde(default)]
    pub down: u64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub reset: i64,
}

/// Decoded `settings` blob
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InboundSettings {
    #[serde(default)]
    pub clients: Vec<Client>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decryption: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<Value>,
    /// Protocol-specific keys kept verbatim for write-back
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decoded `sniffing` blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sniffing {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_dest_override")]
    pub dest_override: Vec<String>,
    #[serde(default)]
    pub metadata_only: bool,
    #[serde(default)]
    pub route_only: bool,
}

fn default_dest_override() -> Vec<String> {
    vec!["http".to_string(), "tls".to_string()]
}

impl Default for Sniffing {
    fn default() -> Self {
        Self {
            enabled: false,
            dest_override: default_dest_override(),
            metadata_only: false,
            route_only: false,
        }
    }
}

/// Decoded `allocate` blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocate {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_refresh")]
    pub refresh: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

fn default_strategy() -> String {
    "always".to_string()
}

fn default_refresh() -> u32 {
    5
}

fn default_concurrency() -> u32 {
    3
}

/// Inbound record exactly as the panel sends it: three sections are
/// independently JSON-encoded strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInbound {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub up: u64,
    #[serde(default)]
    pub down: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub remark: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub client_stats: Vec<ClientStat>,
    #[serde(default)]
    pub listen: String,
    pub port: i64,
    pub protocol: Protocol,
    #[serde(default)]
    pub settings: String,
    #[serde(default)]
    pub stream_settings: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub sniffing: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocate: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<ClientStat>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ClientStat>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Fully typed inbound
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub id: i64,
    pub up: u64,
    pub down: u64,
    pub total: u64,
    pub remark: String,
    pub enable: bool,
    pub expiry_time: i64,
    pub client_stats: Vec<ClientStat>,
    pub listen: String,
    pub port: u16,
    pub protocol: Protocol,
    pub settings: InboundSettings,
    pub stream_settings: StreamSettings,
    pub tag: String,
    pub sniffing: Sniffing,
    pub allocate: Option<Allocate>,
}

impl Inbound {
    /// Enabled and speaking one of `protocols`
    pub fn is_eligible(&self, protocols: &[Protocol]) -> bool {
        self.enable && protocols.contains(&self.protocol)
    }

    pub fn clients(&self) -> &[Client] {
        &self.settings.clients
    }

    /// Client matching either the id or the email
    pub fn find_client(&self, id: Option<&str>, email: &str) -> Option<&Client> {
        self.settings.clients.iter().find(|c| {
            id.is_some_and(|id| !id.is_empty() && c.id == id) || c.email == email
        })
    }

    pub fn find_client_by_email(&self, email: &str) -> Option<&Client> {
        self.settings.clients.iter().find(|c| c.email == email)
    }

    pub fn client_stat(&self, email: &str) -> Option<&ClientStat> {
        self.client_stats.iter().find(|s| s.email == email)
    }

    /// Clients whose expiry is set and already in the past
    pub fn expired_clients(&self, now_ms: i64) -> usize {
        self.settings
            .clients
            .iter()
            .filter(|c| c.expiry_time > 0 && c.expiry_time < now_ms)
            .count()
    }
}
