//! Typed panel API built on the session executor

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::api::PanelApi;
use super::session::{Credentials, PanelSession, SessionConfig};
use super::transport::{HttpTransport, PanelRequest, PanelTransport};
use super::types::{Envelope, OnlineClient, OnlineReport, PanelSummary, ServerStatus};
use crate::error::{PanelError, Result};
use crate::inbound::{self, Client, ClientStat, Inbound, RawInbound};
use crate::logger::log;

const INBOUNDS: &str = "/panel/api/inbounds";
const SERVER: &str = "/panel/api/server";
const ONLINE_TTL: Duration = Duration::from_secs(60);
const STATUS_TTL: Duration = Duration::from_secs(30);
const NO_IP_RECORD: &str = "No IP Record";

/// Client for one panel
pub struct PanelClient {
    session: PanelSession,
}

impl PanelClient {
    pub fn new(session: PanelSession) -> Self {
        Self { session }
    }

    /// Build a client speaking HTTP(S) to `base_url`
    pub fn connect(
        name: impl Into<String>,
        base_url: &str,
        credentials: Credentials,
        config: SessionConfig,
        allow_insecure: bool,
    ) -> Result<Self> {
        let transport: Arc<dyn PanelTransport> =
            Arc::new(HttpTransport::new(base_url, config.timeout, allow_insecure)?);
        Ok(Self::new(PanelSession::new(name, credentials, config, transport)))
    }

    pub fn session(&self) -> &PanelSession {
        &self.session
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: PanelRequest,
        use_cache: bool,
        ttl: Option<Duration>,
    ) -> Result<Option<T>> {
        self.session
            .authenticated_execute::<Envelope<T>>(request, use_cache, ttl)
            .await?
            .into_result()
    }

    /// Mutation: `success: false` becomes `Rejected`
    async fn mutate(&self, request: PanelRequest, invalidate: &[&str]) -> Result<()> {
        let result = self.call::<Value>(request, false, None).await;
        for pattern in invalidate {
            self.session.invalidate(pattern);
        }
        result.map(|_| ())
    }

    /// Fresh login; false when the panel cannot be reached or refuses us
    pub async fn test_connection(&self) -> bool {
        match self.session.login().await {
            Ok(()) => true,
            Err(e) => {
                log::warn!(panel = %self.session.name(), error = %e, "Connection test failed");
                false
            }
        }
    }

    /// Best-effort logout; the local session is dropped either way
    pub async fn logout(&self) {
        if self.session.is_authenticated().await {
            if let Err(e) = self.call::<Value>(PanelRequest::post("/logout"), false, None).await {
                log::debug!(panel = %self.session.name(), error = %e, "Logout request failed");
            }
        }
        self.session.reset().await;
    }

    pub async fn get_inbound(&self, id: i64) -> Result<Option<Inbound>> {
        let raw: Option<RawInbound> = self
            .call(PanelRequest::get(format!("{}/get/{}", INBOUNDS, id)), true, None)
            .await?;
        raw.map(inbound::parse_inbound).transpose()
    }

    pub async fn add_inbound(&self, inbound: &Inbound) -> Result<()> {
        inbound::validate(inbound)?;
        let raw = inbound::to_raw(inbound)?;
        let mut body = serde_json::to_value(&raw)?;
        if let Some(map) = body.as_object_mut() {
            map.remove("id");
            map.remove("clientStats");
        }
        self.mutate(
            PanelRequest::post(format!("{}/add", INBOUNDS)).with_body(body),
            &[INBOUNDS],
        )
        .await
    }

    pub async fn update_inbound(&self, inbound: &Inbound) -> Result<()> {
        inbound::validate(inbound)?;
        let raw = inbound::to_raw(inbound)?;
        let mut body = serde_json::to_value(&raw)?;
        if let Some(map) = body.as_object_mut() {
            map.remove("clientStats");
        }
        self.mutate(
            PanelRequest::post(format!("{}/update/{}", INBOUNDS, inbound.id)).with_body(body),
            &[INBOUNDS],
        )
        .await
    }

    pub async fn delete_inbound(&self, id: i64) -> Result<()> {
        self.mutate(PanelRequest::post(format!("{}/del/{}", INBOUNDS, id)), &[INBOUNDS])
            .await
    }

    /// Flip the enabled flag of one inbound
    pub async fn toggle_inbound(&self, id: i64, enable: bool) -> Result<()> {
        let mut inbound = self
            .get_inbound(id)
            .await?
            .ok_or_else(|| PanelError::Rejected(format!("inbound {} not found", id)))?;
        inbound.enable = enable;
        self.update_inbound(&inbound).await
    }

    pub async fn client_ips(&self, email: &str) -> Result<Vec<String>> {
        let obj: Option<Value> = self
            .call(
                PanelRequest::post(format!("{}/clientIps/{}", INBOUNDS, email)),
                true,
                None,
            )
            .await?;
        Ok(parse_client_ips(obj))
    }

    pub async fn reset_client_ips(&self, email: &str) -> Result<()> {
        self.mutate(
            PanelRequest::post(format!("{}/clearClientIps/{}", INBOUNDS, email)),
            &[email],
        )
        .await
    }

    /// Remove clients that ran out of traffic or time; `None` means every inbound
    pub async fn delete_depleted_clients(&self, inbound_id: Option<i64>) -> Result<()> {
        let id = inbound_id.unwrap_or(-1);
        self.mutate(
            PanelRequest::post(format!("{}/delDepletedClients/{}", INBOUNDS, id)),
            &[INBOUNDS],
        )
        .await
    }

    pub async fn reset_all_traffic(&self) -> Result<()> {
        self.mutate(PanelRequest::post(format!("{}/resetAllTraffics", INBOUNDS)), &[INBOUNDS])
            .await
    }

    pub async fn reset_inbound_client_traffic(&self, inbound_id: i64) -> Result<()> {
        self.mutate(
            PanelRequest::post(format!("{}/resetAllClientTraffics/{}", INBOUNDS, inbound_id)),
            &[INBOUNDS],
        )
        .await
    }

    pub async fn server_status(&self) -> Result<Option<ServerStatus>> {
        self.call(
            PanelRequest::get(format!("{}/status", SERVER)),
            true,
            Some(STATUS_TTL),
        )
        .await
    }

    pub async fn server_logs(&self) -> Result<String> {
        let obj: Option<Value> = self
            .call(PanelRequest::get(format!("{}/getLogs", SERVER)), false, None)
            .await?;
        Ok(match obj {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Array(lines)) => lines
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
            _ => "No logs available".to_string(),
        })
    }

    /// Totals across every inbound
    pub async fn summary(&self) -> Result<PanelSummary> {
        let inbounds = self.list_inbounds(true).await?;
        Ok(summarize(&inbounds, chrono::Utc::now().timestamp_millis()))
    }

    /// First inbound client with exactly this identity email
    pub async fn find_client_by_email(&self, email: &str) -> Result<Option<(i64, Client)>> {
        let inbounds = self.list_inbounds(true).await?;
        Ok(inbounds.iter().find_map(|inbound| {
            inbound
                .find_client_by_email(email)
                .map(|c| (inbound.id, c.clone()))
        }))
    }

    /// Every identity derived from `owner_email`, across inbounds
    pub async fn find_clients_by_owner_email(&self, owner_email: &str) -> Result<Vec<(i64, Client)>> {
        let inbounds = self.list_inbounds(true).await?;
        Ok(inbounds
            .iter()
            .flat_map(|inbound| {
                let identity = crate::identity::make_identity_email(inbound.id, owner_email);
                inbound
                    .clients()
                    .iter()
                    .filter(move |c| c.email == identity || c.email == owner_email)
                    .map(move |c| (inbound.id, c.clone()))
            })
            .collect())
    }
}

#[async_trait]
impl PanelApi for PanelClient {
    fn name(&self) -> &str {
        self.session.name()
    }

    async fn list_inbounds(&self, use_cache: bool) -> Result<Vec<Inbound>> {
        let path = format!("{}/list", INBOUNDS);
        if !use_cache {
            self.session.invalidate(&path);
        }
        let raws: Vec<RawInbound> = self
            .call(PanelRequest::get(path), use_cache, None)
            .await?
            .unwrap_or_default();
        let inbounds = inbound::parse_inbounds(raws)?;
        log::debug!(panel = %self.session.name(), count = inbounds.len(), "Inbounds listed");
        Ok(inbounds)
    }

    async fn add_client(&self, inbound_id: i64, client: &Client) -> Result<()> {
        let settings = serde_json::to_string(&json!({ "clients": [client] }))?;
        log::debug!(
            panel = %self.session.name(),
            inbound_id = inbound_id,
            email = %client.email,
            "Adding client"
        );
        self.mutate(
            PanelRequest::post(format!("{}/addClient", INBOUNDS))
                .with_body(json!({ "id": inbound_id, "settings": settings })),
            &[INBOUNDS],
        )
        .await
    }

    async fn update_client(&self, inbound_id: i64, client_id: &str, client: &Client) -> Result<()> {
        let settings = serde_json::to_string(&json!({ "clients": [client] }))?;
        self.mutate(
            PanelRequest::post(format!("{}/updateClient/{}", INBOUNDS, client_id))
                .with_body(json!({ "id": inbound_id, "settings": settings })),
            &[INBOUNDS],
        )
        .await
    }

    async fn delete_client(&self, inbound_id: i64, client_id: &str) -> Result<()> {
        self.mutate(
            PanelRequest::post(format!("{}/{}/delClient/{}", INBOUNDS, inbound_id, client_id)),
            &[INBOUNDS],
        )
        .await
    }

    async fn reset_client_traffic(&self, inbound_id: i64, email: &str) -> Result<()> {
        self.mutate(
            PanelRequest::post(format!(
                "{}/{}/resetClientTraffic/{}",
                INBOUNDS, inbound_id, email
            )),
            &[INBOUNDS],
        )
        .await
    }

    async fn online_clients(&self) -> Result<Vec<OnlineClient>> {
        let report: Option<OnlineReport> = self
            .call(
                PanelRequest::post(format!("{}/onlines", INBOUNDS)),
                true,
                Some(ONLINE_TTL),
            )
            .await?;
        Ok(report.map(OnlineReport::into_clients).unwrap_or_default())
    }

    async fn client_stats(&self, email: &str) -> Result<Option<ClientStat>> {
        self.call(
            PanelRequest::get(format!("{}/getClientTraffics/{}", INBOUNDS, email)),
            true,
            None,
        )
        .await
    }
}

/// `clientIps` answers with a JSON array, a JSON array encoded as a string,
/// or the literal "No IP Record"
fn parse_client_ips(obj: Option<Value>) -> Vec<String> {
    match obj {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) if s != NO_IP_RECORD => {
            serde_json::from_str::<Vec<String>>(&s).unwrap_or_else(|_| {
                s.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
        }
        _ => Vec::new(),
    }
}

pub fn summarize(inbounds: &[Inbound], now_ms: i64) -> PanelSummary {
    PanelSummary {
        inbounds: inbounds.len(),
        enabled_inbounds: inbounds.iter().filter(|i| i.enable).count(),
        clients: inbounds.iter().map(|i| i.clients().len()).sum(),
        expired_clients: inbounds.iter().map(|i| i.expired_clients(now_ms)).sum(),
        up: inbounds.iter().map(|i| i.up).sum(),
        down: inbounds.iter().map(|i| i.down).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_ips_variants() {
        assert!(parse_client_ips(None).is_empty());
        assert!(parse_client_ips(Some(json!("No IP Record"))).is_empty());
        assert_eq!(
            parse_client_ips(Some(json!("[\"1.1.1.1\",\"2.2.2.2\"]"))),
            vec!["1.1.1.1", "2.2.2.2"]
        );
        assert_eq!(parse_client_ips(Some(json!(["3.3.3.3"]))), vec!["3.3.3.3"]);
        assert_eq!(
            parse_client_ips(Some(json!("4.4.4.4 (2024-01-01)\n"))),
            vec!["4.4.4.4 (2024-01-01)"]
        );
    }
}
