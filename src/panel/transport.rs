//! HTTP seam between the session client and a panel

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, SET_COOKIE, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::error::{PanelError, Result};

const CLIENT_USER_AGENT: &str = concat!("panel-fleet/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// One request against a panel path
#[derive(Debug, Clone, PartialEq)]
pub struct PanelRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// `name=value` session cookie
    pub cookie: Option<String>,
}

impl PanelRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            cookie: None,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: None,
            cookie: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Cache key: path plus the request options
    pub fn cache_key(&self) -> String {
        let body = self
            .body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        format!("{}:{}{}", self.path, self.method, body)
    }
}

/// Raw HTTP answer; status handling happens in the session layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PanelResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl PanelResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            set_cookies: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.set_cookies.push(cookie.into());
        self
    }
}

/// Sends requests to one panel. Implementations report transport failures
/// (no HTTP status) as `PanelError::Network` and never interpret statuses.
#[async_trait]
pub trait PanelTransport: Send + Sync {
    async fn send(&self, request: &PanelRequest) -> Result<PanelResponse>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, connect_timeout: Duration, allow_insecure: bool) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| PanelError::Config(format!("Invalid panel URL '{}': {}", base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(PanelError::Config(format!(
                "Unsupported panel URL scheme: {}",
                base_url.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(allow_insecure)
            .build()
            .map_err(|e| PanelError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PanelTransport for HttpTransport {
    async fn send(&self, request: &PanelRequest) -> Result<PanelResponse> {
        let url = self.url_for(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        }
        .header(USER_AGENT, CLIENT_USER_AGENT)
        .header(ACCEPT, "application/json, text/plain, */*");

        if let Some(cookie) = &request.cookie {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(body) = &request.body {
            builder = builder.header(CONTENT_TYPE, "application/json").json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PanelError::Network(format!("{} {}: {}", request.method, url, e)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| PanelError::Network(format!("Failed to read body from {}: {}", url, e)))?;

        Ok(PanelResponse {
            status,
            content_type,
            set_cookies,
            body,
        })
    }
}
