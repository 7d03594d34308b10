//! Authenticated, cached, retrying request executor for one panel
//!
//! Owns the session cookie and the response cache. Nothing here is shared
//! across panels or processes.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::cache::ResponseCache;
use super::transport::{PanelRequest, PanelResponse, PanelTransport};
use super::types::Envelope;
use crate::error::{PanelError, Result};
use crate::logger::log;
use crate::utils::linear_backoff;

const LOGIN_PATH: &str = "/login";
const PREFERRED_COOKIES: [&str; 3] = ["session", "3x-ui", "xui"];

/// Request behaviour knobs
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Bound on a single attempt
    pub timeout: Duration,
    /// Default cache entry lifetime
    pub cache_ttl: Duration,
    /// Extra attempts after the first on transport failure
    pub max_retries: u32,
    /// Base of the linear backoff
    pub retry_delay: Duration,
    /// Trace every request
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// An established login. Some panels keep the session server-side and send
/// no cookie, so the cookie is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Session {
    cookie: Option<String>,
}

pub struct PanelSession {
    name: String,
    credentials: Credentials,
    config: SessionConfig,
    transport: Arc<dyn PanelTransport>,
    session: RwLock<Option<Session>>,
    /// Serializes logins and keeps the failure of the last attempt so that
    /// callers queued behind it get that result instead of logging in again
    login_gate: Mutex<Option<PanelError>>,
    /// Login attempts that have finished, either way
    settled_logins: AtomicU64,
    cache: ResponseCache,
    logins: AtomicU64,
}

impl PanelSession {
    pub fn new(
        name: impl Into<String>,
        credentials: Credentials,
        config: SessionConfig,
        transport: Arc<dyn PanelTransport>,
    ) -> Self {
        let cache = ResponseCache::new(config.cache_ttl);
        Self {
            name: name.into(),
            credentials,
            config,
            transport,
            session: RwLock::new(None),
            login_gate: Mutex::new(None),
            settled_logins: AtomicU64::new(0),
            cache,
            logins: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of login round-trips performed so far
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Forget the session and every cached response
    pub async fn reset(&self) {
        *self.session.write().await = None;
        self.cache.clear();
    }

    pub fn invalidate(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Fresh login regardless of the current session
    pub async fn login(&self) -> Result<()> {
        let mut last_failure = self.login_gate.lock().await;
        *self.session.write().await = None;
        self.settle_login(&mut last_failure).await.map(|_| ())
    }

    async fn ensure_session(&self) -> Result<Session> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }

        let seen = self.settled_logins.load(Ordering::Acquire);
        let mut last_failure = self.login_gate.lock().await;
        // Another caller may have logged in while we waited
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        // ...or failed to, in which case its error is ours too
        if self.settled_logins.load(Ordering::Acquire) != seen {
            if let Some(err) = last_failure.clone() {
                return Err(err);
            }
        }

        log::debug!(panel = %self.name, "No session, authenticating");
        self.settle_login(&mut last_failure).await
    }

    /// Run one login while holding the gate and record how it ended
    async fn settle_login(&self, last_failure: &mut Option<PanelError>) -> Result<Session> {
        let outcome = self.perform_login().await;
        match &outcome {
            Ok(session) => {
                *last_failure = None;
                *self.session.write().await = Some(session.clone());
            }
            Err(e) => *last_failure = Some(e.clone()),
        }
        self.settled_logins.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn perform_login(&self) -> Result<Session> {
        self.logins.fetch_add(1, Ordering::Relaxed);
        let request = PanelRequest::post(LOGIN_PATH).with_body(json!({
            "username": self.credentials.username,
            "password": self.credentials.password,
        }));

        let response = self.send_with_retry(&request).await?;
        let cookie = extract_session_cookie(&response.set_cookies);
        let value = decode_response(&response)?;
        let envelope: Envelope<Value> = serde_json::from_value(value)
            .map_err(|e| PanelError::Validation(format!("login response: {}", e)))?;

        if !envelope.success {
            let msg = if envelope.msg.is_empty() {
                "login rejected".to_string()
            } else {
                envelope.msg
            };
            log::warn!(panel = %self.name, reason = %msg, "Panel login failed");
            return Err(PanelError::Authentication(msg));
        }

        if cookie.is_none() {
            log::warn!(panel = %self.name, "Login succeeded without a session cookie");
        } else {
            log::info!(panel = %self.name, "Authenticated with panel");
        }
        Ok(Session { cookie })
    }

    /// Send with per-attempt timeout and linear backoff on transport failure
    async fn send_with_retry(&self, request: &PanelRequest) -> Result<PanelResponse> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = PanelError::Network("no attempt made".to_string());

        for attempt in 1..=attempts {
            if self.config.debug {
                log::panel_request(&self.name, &request.method.to_string(), &request.path, attempt);
            }

            let outcome = tokio::time::timeout(self.config.timeout, self.transport.send(request)).await;
            match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) if e.is_retryable() => last_error = e,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_error = PanelError::Network(format!(
                        "{} {} timed out after {:?}",
                        request.method, request.path, self.config.timeout
                    ))
                }
            }

            if attempt < attempts {
                let delay = linear_backoff(attempt, self.config.retry_delay);
                log::debug!(
                    panel = %self.name,
                    endpoint = %request.path,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(PanelError::Network(format!(
            "{} {} failed after {} attempts: {}",
            request.method, request.path, attempts, last_error
        )))
    }

    /// One pass: cache, session, request, status mapping, decode
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: PanelRequest,
        use_cache: bool,
        ttl: Option<Duration>,
    ) -> Result<T> {
        let key = request.cache_key();
        if use_cache {
            if let Some(value) = self.cache.get(&key) {
                if self.config.debug {
                    log::debug!(panel = %self.name, key = %key, "Cache hit");
                }
                return serde_json::from_value(value).map_err(|e| {
                    PanelError::Validation(format!("{}: {}", request.path, e))
                });
            }
        }

        let session = self.ensure_session().await?;
        let mut request = request;
        request.cookie = session.cookie;

        let response = self.send_with_retry(&request).await?;
        if let Some(cookie) = extract_session_cookie(&response.set_cookies) {
            let mut guard = self.session.write().await;
            if let Some(current) = guard.as_mut() {
                current.cookie = Some(cookie);
            }
        }

        let value = decode_response(&response).map_err(|e| match e {
            PanelError::Validation(msg) => PanelError::Validation(format!("{}: {}", request.path, msg)),
            other => other,
        })?;
        let decoded: T = serde_json::from_value(value.clone())
            .map_err(|e| PanelError::Validation(format!("{}: {}", request.path, e)))?;

        if use_cache {
            self.cache.insert(key, value, ttl);
        }
        Ok(decoded)
    }

    /// `execute`, re-authenticating and retrying once on an auth failure
    pub async fn authenticated_execute<T: DeserializeOwned>(
        &self,
        request: PanelRequest,
        use_cache: bool,
        ttl: Option<Duration>,
    ) -> Result<T> {
        match self.execute(request.clone(), use_cache, ttl).await {
            Err(PanelError::Authentication(reason)) => {
                // No session means the login itself failed; logging in again
                // right away would only repeat it
                if !self.is_authenticated().await {
                    return Err(PanelError::Authentication(reason));
                }
                log::info!(panel = %self.name, reason = %reason, "Session rejected, re-authenticating");
                self.reset().await;
                self.execute(request, use_cache, ttl).await
            }
            other => other,
        }
    }
}

/// Map the HTTP status and parse the body into JSON
fn decode_response(response: &PanelResponse) -> Result<Value> {
    match response.status {
        200..=299 => {}
        401 => return Err(PanelError::Authentication(format!("401: {}", response.body))),
        403 => return Err(PanelError::Authentication(format!("403: {}", response.body))),
        status => {
            return Err(PanelError::Http {
                status,
                message: response.body.chars().take(200).collect(),
            })
        }
    }

    if response.body.trim().is_empty() {
        let content_type = response.content_type.as_deref().unwrap_or_default();
        if content_type.contains("text/plain") || content_type.contains("text/html") {
            return Ok(json!({"success": true, "msg": "", "obj": null}));
        }
        return Err(PanelError::Validation("empty response body".to_string()));
    }

    serde_json::from_str(&response.body).map_err(|e| {
        let preview: String = response.body.chars().take(200).collect();
        PanelError::Validation(format!("invalid JSON ({}): {}", e, preview))
    })
}

/// Pick the session cookie out of `Set-Cookie` headers as `name=value`
pub fn extract_session_cookie(set_cookies: &[String]) -> Option<String> {
    let pairs: Vec<(String, String)> = set_cookies
        .iter()
        .filter_map(|header| {
            let pair = header.split(';').next()?.trim();
            let (name, value) = pair.split_once('=')?;
            if value.is_empty() {
                return None;
            }
            Some((name.trim().to_string(), pair.to_string()))
        })
        .collect();

    pairs
        .iter()
        .find(|(name, _)| PREFERRED_COOKIES.contains(&name.to_lowercase().as_str()))
        .or_else(|| {
            pairs.iter().find(|(name, _)| {
                let name = name.to_lowercase();
                name.contains("session") || name.contains("auth") || name.contains("ui")
            })
        })
        .map(|(_, pair)| pair.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_extract_preferred_cookie() {
        let headers = vec![
            "lang=en; Path=/".to_string(),
            "3x-ui=MTcw; Path=/; HttpOnly".to_string(),
        ];
        assert_eq!(extract_session_cookie(&headers), Some("3x-ui=MTcw".to_string()));
    }

    #[test]
    fn test_extract_fallback_cookie() {
        let headers = vec!["my_auth_token=abc; Path=/".to_string()];
        assert_eq!(
            extract_session_cookie(&headers),
            Some("my_auth_token=abc".to_string())
        );
        assert_eq!(extract_session_cookie(&["lang=en".to_string()]), None);
    }

    #[test]
    fn test_deleted_cookie_ignored() {
        let headers = vec!["session=; Max-Age=0".to_string()];
        assert_eq!(extract_session_cookie(&headers), None);
    }

    #[test]
    fn test_decode_status_mapping() {
        let r = |status| PanelResponse::json(status, "nope");
        assert!(matches!(decode_response(&r(401)), Err(PanelError::Authentication(_))));
        assert!(matches!(decode_response(&r(403)), Err(PanelError::Authentication(_))));
        assert!(matches!(
            decode_response(&r(404)),
            Err(PanelError::Http { status: 404, .. })
        ));
        assert!(matches!(
            decode_response(&r(502)),
            Err(PanelError::Http { status: 502, .. })
        ));
    }

    #[test]
    fn test_decode_empty_text_body() {
        let response = PanelResponse {
            status: 200,
            content_type: Some("text/plain; charset=utf-8".to_string()),
            set_cookies: Vec::new(),
            body: String::new(),
        };
        let value = decode_response(&response).unwrap();
        assert_eq!(value["success"], true);

        let json_empty = PanelResponse::json(200, "");
        assert!(matches!(decode_response(&json_empty), Err(PanelError::Validation(_))));
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = decode_response(&PanelResponse::json(200, "<html>")).unwrap_err();
        assert!(matches!(err, PanelError::Validation(_)));
    }
}
