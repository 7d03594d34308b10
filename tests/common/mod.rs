//! In-memory fakes for the panel, cloud and shell seams
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use panel_fleet::error::{FleetError, PanelError, Result};
use panel_fleet::fleet::{
    CloudApi, CommandOutput, Instance, InstanceRequest, RemoteShell, ShellSession,
};
use panel_fleet::inbound::{
    Client, ClientStat, Inbound, InboundSettings, Protocol, Sniffing, StreamSettings,
};
use panel_fleet::panel::{OnlineClient, PanelApi, PanelRequest, PanelResponse, PanelTransport};
use panel_fleet::store::{PlanLimits, Subscription};

pub const GB: u64 = 1024 * 1024 * 1024;

pub fn ok_envelope(obj: &str) -> String {
    format!(r#"{{"success":true,"msg":"","obj":{}}}"#, obj)
}

pub fn login_ok() -> PanelResponse {
    PanelResponse::json(200, ok_envelope("null")).with_cookie("3x-ui=abc123; Path=/; HttpOnly")
}

pub fn subscription(id: &str, owner_email: &str, panel_id: &str) -> Subscription {
    Subscription::new(
        id,
        owner_email,
        panel_id,
        Utc::now() + ChronoDuration::days(30),
        PlanLimits {
            max_devices: 2,
            traffic_limit_bytes: 50 * GB,
        },
    )
}

pub fn inbound(id: i64, protocol: Protocol) -> Inbound {
    Inbound {
        id,
        up: 0,
        down: 0,
        total: 0,
        remark: format!("inbound-{}", id),
        enable: true,
        expiry_time: 0,
        client_stats: Vec::new(),
        listen: String::new(),
        port: 10000 + id as u16,
        protocol,
        settings: InboundSettings::default(),
        stream_settings: StreamSettings::default(),
        tag: format!("inbound-{}", 10000 + id),
        sniffing: Sniffing::default(),
        allocate: None,
    }
}

pub fn stat(inbound_id: i64, email: &str, up: u64, down: u64) -> ClientStat {
    ClientStat {
        inbound_id,
        enable: true,
        email: email.to_string(),
        up,
        down,
        ..Default::default()
    }
}

/// Scripted transport: `handler` gets the request and how many times its
/// path has been hit so far (1-based)
pub struct FakeTransport {
    handler: Box<dyn Fn(&PanelRequest, usize) -> Result<PanelResponse> + Send + Sync>,
    calls: Mutex<HashMap<String, usize>>,
    sent: Mutex<Vec<PanelRequest>>,
    delays: HashMap<String, Duration>,
}

impl FakeTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&PanelRequest, usize) -> Result<PanelResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            delays: HashMap::new(),
        }
    }

    /// Hold every request to `path` for `delay` before answering
    pub fn with_delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(path.to_string(), delay);
        self
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// Requests sent to `path`, oldest first
    pub fn requests_to(&self, path: &str) -> Vec<PanelRequest> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PanelTransport for FakeTransport {
    async fn send(&self, request: &PanelRequest) -> Result<PanelResponse> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(request.path.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.sent.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delays.get(&request.path) {
            tokio::time::sleep(*delay).await;
        }
        (self.handler)(request, count)
    }
}

#[derive(Default)]
struct PanelState {
    inbounds: Vec<Inbound>,
    online: Vec<String>,
    failing: HashSet<i64>,
    fail_listing: bool,
    adds: usize,
    updates: Vec<(i64, String, Client)>,
    deletes: Vec<(i64, String)>,
    resets: Vec<(i64, String)>,
}

/// Panel held in memory. Emails are unique per inbound, like the real one.
pub struct FakePanel {
    name: String,
    state: Mutex<PanelState>,
}

impl FakePanel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(PanelState::default()),
        }
    }

    pub fn with_inbound(self, inbound: Inbound) -> Self {
        self.state.lock().unwrap().inbounds.push(inbound);
        self
    }

    pub fn set_online(&self, emails: &[&str]) {
        self.state.lock().unwrap().online = emails.iter().map(|e| e.to_string()).collect();
    }

    /// Every mutation against `inbound_id` is rejected
    pub fn fail_inbound(&self, inbound_id: i64) {
        self.state.lock().unwrap().failing.insert(inbound_id);
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_listing = true;
    }

    pub fn add_count(&self) -> usize {
        self.state.lock().unwrap().adds
    }

    pub fn updates(&self) -> Vec<(i64, String, Client)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn deletes(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn resets(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().resets.clone()
    }

    pub fn clients(&self, inbound_id: i64) -> Vec<Client> {
        self.state
            .lock()
            .unwrap()
            .inbounds
            .iter()
            .find(|i| i.id == inbound_id)
            .map(|i| i.settings.clients.clone())
            .unwrap_or_default()
    }

    fn with_inbound_mut<T>(
        &self,
        inbound_id: i64,
        f: impl FnOnce(&mut Inbound, &mut PanelState) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.failing.contains(&inbound_id) {
            return Err(PanelError::Rejected(format!("inbound {} is locked", inbound_id)));
        }
        let index = state
            .inbounds
            .iter()
            .position(|i| i.id == inbound_id)
            .ok_or_else(|| PanelError::Rejected(format!("inbound {} not found", inbound_id)))?;
        let mut inbound = state.inbounds[index].clone();
        let result = f(&mut inbound, state);
        state.inbounds[index] = inbound;
        result
    }
}

#[async_trait]
impl PanelApi for FakePanel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_inbounds(&self, _use_cache: bool) -> Result<Vec<Inbound>> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(PanelError::Network("connection refused".to_string()));
        }
        Ok(state.inbounds.clone())
    }

    async fn add_client(&self, inbound_id: i64, client: &Client) -> Result<()> {
        self.with_inbound_mut(inbound_id, |inbound, state| {
            if inbound.find_client_by_email(&client.email).is_some() {
                return Err(PanelError::Rejected(format!(
                    "Duplicate email: {}",
                    client.email
                )));
            }
            inbound.settings.clients.push(client.clone());
            inbound.client_stats.push(stat(inbound_id, &client.email, 0, 0));
            state.adds += 1;
            Ok(())
        })
    }

    async fn update_client(&self, inbound_id: i64, client_id: &str, client: &Client) -> Result<()> {
        self.with_inbound_mut(inbound_id, |inbound, state| {
            let slot = inbound
                .settings
                .clients
                .iter_mut()
                .find(|c| c.id == client_id)
                .ok_or_else(|| PanelError::Rejected(format!("client {} not found", client_id)))?;
            *slot = client.clone();
            state
                .updates
                .push((inbound_id, client_id.to_string(), client.clone()));
            Ok(())
        })
    }

    async fn delete_client(&self, inbound_id: i64, client_id: &str) -> Result<()> {
        self.with_inbound_mut(inbound_id, |inbound, state| {
            inbound.settings.clients.retain(|c| c.id != client_id);
            state.deletes.push((inbound_id, client_id.to_string()));
            Ok(())
        })
    }

    async fn reset_client_traffic(&self, inbound_id: i64, email: &str) -> Result<()> {
        self.with_inbound_mut(inbound_id, |inbound, state| {
            for s in inbound.client_stats.iter_mut().filter(|s| s.email == email) {
                s.up = 0;
                s.down = 0;
            }
            state.resets.push((inbound_id, email.to_string()));
            Ok(())
        })
    }

    async fn online_clients(&self) -> Result<Vec<OnlineClient>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .online
            .iter()
            .map(OnlineClient::from_email)
            .collect())
    }

    async fn client_stats(&self, email: &str) -> Result<Option<ClientStat>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .inbounds
            .iter()
            .flat_map(|i| i.client_stats.iter())
            .find(|s| s.email == email)
            .cloned())
    }
}

pub const INSTANCE_ID: u64 = 4242;
pub const INSTANCE_IP: &str = "203.0.113.10";

/// Cloud whose instance turns active after a number of polls
pub struct FakeCloud {
    polls_until_active: usize,
    polls: AtomicUsize,
    fail_delete: AtomicBool,
    created: Mutex<Vec<InstanceRequest>>,
    deleted: Mutex<Vec<u64>>,
}

impl FakeCloud {
    pub fn new(polls_until_active: usize) -> Self {
        Self {
            polls_until_active,
            polls: AtomicUsize::new(0),
            fail_delete: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<InstanceRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<u64> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn create_instance(&self, request: &InstanceRequest) -> std::result::Result<Instance, FleetError> {
        self.created.lock().unwrap().push(request.clone());
        Ok(Instance {
            id: INSTANCE_ID,
            status: "new".to_string(),
            public_ipv4: None,
        })
    }

    async fn get_instance(&self, id: u64) -> std::result::Result<Instance, FleetError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if polls >= self.polls_until_active {
            Ok(Instance {
                id,
                status: "active".to_string(),
                public_ipv4: Some(INSTANCE_IP.to_string()),
            })
        } else {
            Ok(Instance {
                id,
                status: "new".to_string(),
                public_ipv4: None,
            })
        }
    }

    async fn delete_instance(&self, id: u64) -> std::result::Result<(), FleetError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(FleetError::Cloud(format!("delete {} refused", id)));
        }
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }
}

#[derive(Default)]
struct ShellCounters {
    connects: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Remote shell whose host finishes installing after a number of marker
/// checks; `None` never finishes
pub struct FakeShell {
    ready_after: Option<usize>,
    unreachable_connects: usize,
    connect_delay: Option<Duration>,
    marker_checks: Arc<AtomicUsize>,
    counters: Arc<ShellCounters>,
}

impl FakeShell {
    pub fn new(ready_after: Option<usize>) -> Self {
        Self {
            ready_after,
            unreachable_connects: 0,
            connect_delay: None,
            marker_checks: Arc::new(AtomicUsize::new(0)),
            counters: Arc::new(ShellCounters::default()),
        }
    }

    /// The first `n` connects fail as if sshd were not up yet
    pub fn unreachable_for(mut self, n: usize) -> Self {
        self.unreachable_connects = n;
        self
    }

    /// Every connect takes `delay` before it succeeds or fails
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn connect(&self, host: &str) -> std::result::Result<Box<dyn ShellSession>, FleetError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        let attempt = self.counters.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.unreachable_connects {
            return Err(FleetError::Shell(format!("{}: connection refused", host)));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            ready_after: self.ready_after,
            marker_checks: Arc::clone(&self.marker_checks),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeSession {
    ready_after: Option<usize>,
    marker_checks: Arc<AtomicUsize>,
    counters: Arc<ShellCounters>,
}

fn output(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: format!("{}\n", stdout),
        stderr: String::new(),
    }
}

#[async_trait]
impl ShellSession for FakeSession {
    async fn exec(&self, command: &str) -> std::result::Result<CommandOutput, FleetError> {
        if command.starts_with("test -f") {
            let checks = self.marker_checks.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(match self.ready_after {
                Some(n) if checks >= n => output("ready"),
                _ => CommandOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: String::new(),
                },
            });
        }
        Ok(if command.starts_with("systemctl") {
            output("active")
        } else if command.starts_with("df") {
            output("42%")
        } else if command.starts_with("free") {
            output("37.5")
        } else if command.starts_with("uptime") {
            output(" 0.10, 0.05, 0.01")
        } else {
            CommandOutput {
                exit_code: 127,
                stdout: String::new(),
                stderr: "command not found".to_string(),
            }
        })
    }

    async fn close(&self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}
