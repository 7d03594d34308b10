//! Transport and security settings of an inbound

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Transport network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Kcp,
    Ws,
    /// HTTP/2
    Http,
    #[serde(rename = "domainsocket")]
    DomainSocket,
    Quic,
    Grpc,
    #[serde(rename = "httpupgrade")]
    HttpUpgrade,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Kcp => "kcp",
            Network::Ws => "ws",
            Network::Http => "http",
            Network::DomainSocket => "domainsocket",
            Network::Quic => "quic",
            Network::Grpc => "grpc",
            Network::HttpUpgrade => "httpupgrade",
        }
    }
}

/// Security layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    #[default]
    None,
    Tls,
    Reality,
}

impl Security {
    pub fn as_str(&self) -> &'static str {
        match self {
            Security::None => "none",
            Security::Tls => "tls",
            Security::Reality => "reality",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpSettings {
    #[serde(default)]
    pub accept_proxy_protocol: bool,
    #[serde(default)]
    pub header: TcpHeader,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpHeader {
    #[serde(rename = "type", default = "default_header_type")]
    pub header_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for TcpHeader {
    fn default() -> Self {
        Self {
            header_type: default_header_type(),
            extra: Map::new(),
        }
    }
}

fn default_header_type() -> String {
    "none".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsSettings {
    #[serde(default)]
    pub accept_proxy_protocol: bool,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSettings {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub multi_mode: bool,
}

/// HTTP/2 transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default)]
    pub host: Vec<String>,
    #[serde(default = "default_path")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsClientSettings {
    #[serde(default)]
    pub allow_insecure: bool,
    #[serde(default)]
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub alpn: Vec<String>,
    #[serde(default)]
    pub min_version: String,
    #[serde(default)]
    pub max_version: String,
    #[serde(default)]
    pub certificates: Vec<Value>,
    #[serde(default)]
    pub settings: TlsClientSettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealityClientSettings {
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub spider_x: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    #[serde(default)]
    pub dest: String,
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub short_ids: Vec<String>,
    #[serde(default)]
    pub settings: RealityClientSettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decoded `streamSettings` blob
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub security: Security,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_settings: Option<TcpSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_settings: Option<GrpcSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_settings: Option<HttpSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality_settings: Option<RealitySettings>,
    /// kcp/quic/externalProxy and friends, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StreamSettings {
    /// Host header / authority a client should present, if any
    pub fn host(&self) -> Option<&str> {
        match self.network {
            Network::Ws => self
                .ws_settings
                .as_ref()
                .map(|w| w.host.as_str())
                .filter(|h| !h.is_empty()),
            Network::Http => self
                .http_settings
                .as_ref()
                .and_then(|h| h.host.first())
                .map(String::as_str),
            _ => None,
        }
    }

    /// Path (ws / h2) or service name (grpc)
    pub fn path(&self) -> Option<&str> {
        match self.network {
            Network::Ws => self.ws_settings.as_ref().map(|w| w.path.as_str()),
            Network::Http => self.http_settings.as_ref().map(|h| h.path.as_str()),
            Network::Grpc => self
                .grpc_settings
                .as_ref()
                .map(|g| g.service_name.as_str()),
            _ => None,
        }
    }

    /// SNI advertised to clients
    pub fn server_name(&self) -> Option<&str> {
        match self.security {
            Security::Tls => self
                .tls_settings
                .as_ref()
                .map(|t| t.server_name.as_str())
                .filter(|s| !s.is_empty()),
            Security::Reality => self
                .reality_settings
                .as_ref()
                .and_then(|r| r.server_names.first())
                .map(String::as_str),
            Security::None => None,
        }
    }

    /// TCP header type, "none" unless HTTP camouflage is configured
    pub fn header_type(&self) -> &str {
        self.tcp_settings
            .as_ref()
            .map(|t| t.header.header_type.as_str())
            .unwrap_or("none")
    }
}
