//! Edge server lifecycle: create → install → verify → ready, and teardown

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

use super::bootstrap::{install_script, marker_check};
use super::cloud::{CloudApi, InstanceRequest};
use super::shell::{RemoteShell, ShellSession};
use super::status::ProvisionStatus;
use crate::config::FleetConfig;
use crate::error::{FleetError, StoreError};
use crate::logger::log;
use crate::store::{ProvisionedServer, ServerStore};
use crate::utils::poll_until;

const UNKNOWN: &str = "unknown";

const PROXY_STATUS_CMD: &str = "systemctl is-active v2ray";
const DISK_USAGE_CMD: &str = "df -h / | tail -1 | awk '{print $5}'";
const MEMORY_USAGE_CMD: &str = "free | grep Mem | awk '{printf \"%.1f\", $3/$2 * 100.0}'";
const LOAD_AVERAGE_CMD: &str = "uptime | awk -F'load average:' '{ print $2 }'";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub name: String,
    pub location: String,
    pub region: String,
    pub size: String,
}

/// Point-in-time health sample; fields that could not be read are `unknown`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub server_id: String,
    pub proxy_active: bool,
    pub disk_usage: String,
    pub memory_usage: String,
    pub load_average: String,
    pub cloud_status: String,
    pub checked_at: DateTime<Utc>,
}

/// Routing tag for a server: `server_` plus the last 8 characters of its id
pub fn outbound_tag(server_id: &str) -> String {
    let start = server_id
        .char_indices()
        .rev()
        .nth(7)
        .map(|(i, _)| i)
        .unwrap_or(0);
    format!("server_{}", &server_id[start..])
}

pub struct FleetOrchestrator {
    cloud: Arc<dyn CloudApi>,
    shell: Arc<dyn RemoteShell>,
    servers: Arc<dyn ServerStore>,
    config: FleetConfig,
}

impl FleetOrchestrator {
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        shell: Arc<dyn RemoteShell>,
        servers: Arc<dyn ServerStore>,
        config: FleetConfig,
    ) -> Self {
        Self {
            cloud,
            shell,
            servers,
            config,
        }
    }

    pub async fn list(&self) -> Result<Vec<ProvisionedServer>, FleetError> {
        Ok(self.servers.servers().await?)
    }

    async fn load(&self, server_id: &str) -> Result<ProvisionedServer, FleetError> {
        self.servers
            .server(server_id)
            .await?
            .ok_or_else(|| StoreError::not_found("server", server_id).into())
    }

    async fn transition(
        &self,
        server: &mut ProvisionedServer,
        next: ProvisionStatus,
    ) -> Result<(), FleetError> {
        if !server.status.can_transition_to(next) {
            return Err(FleetError::InvalidTransition {
                from: server.status.to_string(),
                to: next.to_string(),
            });
        }
        log::status_change(&server.id, server.status.as_str(), next.as_str());
        server.status = next;
        server.active = next == ProvisionStatus::Ready;
        self.servers.save_server(server).await?;
        Ok(())
    }

    /// Park the record in `Error`; no retry follows
    async fn fail(&self, server: &mut ProvisionedServer, error: &FleetError) {
        log::error!(server_id = %server.id, error = %error, "Provisioning failed");
        if let Err(e) = self.transition(server, ProvisionStatus::Error).await {
            log::error!(server_id = %server.id, error = %e, "Failed to record error status");
        }
    }

    /// Record a server the orchestrator does not manage
    pub async fn register_manual(
        &self,
        name: &str,
        host: &str,
        location: &str,
    ) -> Result<ProvisionedServer, FleetError> {
        let id = Uuid::new_v4().to_string();
        let server = ProvisionedServer {
            outbound_tag: Some(outbound_tag(&id)),
            id,
            name: name.to_string(),
            location: location.to_string(),
            region: None,
            size: None,
            status: ProvisionStatus::Manual,
            instance_id: None,
            host: Some(host.to_string()),
            active: true,
            auto_provision: false,
            last_health_check: None,
            created_at: Utc::now(),
        };
        self.servers.save_server(&server).await?;
        Ok(server)
    }

    /// Create, install and verify a new edge server. Any failure leaves the
    /// record in `Error`.
    pub async fn provision(
        &self,
        request: ProvisionRequest,
    ) -> Result<ProvisionedServer, FleetError> {
        let mut server = ProvisionedServer {
            id: Uuid::new_v4().to_string(),
            name: request.name.clone(),
            location: request.location.clone(),
            region: Some(request.region.clone()),
            size: Some(request.size.clone()),
            status: ProvisionStatus::Provisioning,
            instance_id: None,
            host: None,
            outbound_tag: None,
            active: false,
            auto_provision: true,
            last_health_check: None,
            created_at: Utc::now(),
        };
        self.servers.save_server(&server).await?;
        log::info!(
            server_id = %server.id,
            name = %server.name,
            region = %request.region,
            "Provisioning server"
        );

        match self.drive(&mut server, &request).await {
            Ok(()) => Ok(server),
            Err(e) => {
                self.fail(&mut server, &e).await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        server: &mut ProvisionedServer,
        request: &ProvisionRequest,
    ) -> Result<(), FleetError> {
        let instance = self
            .cloud
            .create_instance(&InstanceRequest {
                name: format!(
                    "{}-{}-{}",
                    self.config.name_prefix,
                    request.region,
                    Utc::now().timestamp_millis()
                ),
                region: request.region.clone(),
                size: request.size.clone(),
                image: self.config.image.clone(),
                ssh_keys: self.config.ssh_key_fingerprints.clone(),
                tags: self.config.tags.clone(),
                user_data: install_script(self.config.proxy_ports),
                monitoring: true,
                ipv6: false,
            })
            .await?;
        server.instance_id = Some(instance.id);
        self.servers.save_server(server).await?;
        log::info!(server_id = %server.id, instance_id = instance.id, "Instance created");

        let host = self.wait_for_instance(instance.id).await?;
        server.host = Some(host.clone());
        self.transition(server, ProvisionStatus::Installing).await?;

        self.wait_for_install(&host).await?;
        self.transition(server, ProvisionStatus::Configuring).await?;

        server.outbound_tag = Some(outbound_tag(&server.id));
        self.transition(server, ProvisionStatus::Ready).await?;

        log::info!(server_id = %server.id, host = %host, "Server ready");
        Ok(())
    }

    /// Public IPv4 once the instance is active
    async fn wait_for_instance(&self, instance_id: u64) -> Result<String, FleetError> {
        let cloud = Arc::clone(&self.cloud);
        let found = poll_until(
            self.config.instance_poll_interval,
            self.config.instance_timeout,
            || {
                let cloud = Arc::clone(&cloud);
                async move {
                    let instance = cloud.get_instance(instance_id).await?;
                    log::debug!(instance_id = instance_id, status = %instance.status, "Polled instance");
                    Ok::<_, FleetError>(if instance.is_ready() {
                        instance.public_ipv4
                    } else {
                        None
                    })
                }
            },
        )
        .await?;
        found.ok_or_else(|| {
            FleetError::Timeout(format!(
                "instance {} not active after {:?}",
                instance_id, self.config.instance_timeout
            ))
        })
    }

    /// Connection failures while polling only mean "not ready yet"
    async fn wait_for_install(&self, host: &str) -> Result<(), FleetError> {
        let shell = Arc::clone(&self.shell);
        let found = poll_until(
            self.config.install_poll_interval,
            self.config.install_timeout,
            || {
                let shell = Arc::clone(&shell);
                let host = host.to_string();
                async move {
                    let session = match shell.connect(&host).await {
                        Ok(session) => session,
                        Err(e) => {
                            log::debug!(host = %host, error = %e, "Host not reachable yet");
                            return Ok::<_, FleetError>(None);
                        }
                    };
                    let result = session.exec(&marker_check()).await;
                    session.close().await;
                    Ok(match result {
                        Ok(out) if out.stdout.trim() == "ready" => Some(()),
                        _ => None,
                    })
                }
            },
        )
        .await?;
        found.ok_or_else(|| {
            FleetError::Timeout(format!(
                "install on {} not finished after {:?}",
                host, self.config.install_timeout
            ))
        })
    }

    /// Mark the record `Destroying`, delete the instance, then drop the
    /// record. A failed cloud delete leaves the record in `Error`.
    pub async fn destroy(&self, server_id: &str) -> Result<(), FleetError> {
        let mut server = self.load(server_id).await?;
        self.transition(&mut server, ProvisionStatus::Destroying).await?;
        self.teardown(&mut server).await
    }

    async fn teardown(&self, server: &mut ProvisionedServer) -> Result<(), FleetError> {
        if let Some(instance_id) = server.instance_id {
            if let Err(e) = self.cloud.delete_instance(instance_id).await {
                log::error!(
                    server_id = %server.id,
                    instance_id = instance_id,
                    error = %e,
                    "Instance delete failed"
                );
                self.transition(server, ProvisionStatus::Error).await?;
                return Err(e);
            }
        }
        self.servers.delete_server(&server.id).await?;
        log::info!(server_id = %server.id, "Server destroyed");
        Ok(())
    }

    /// Re-issue deletes for records left in `Destroying`
    pub async fn resume_teardowns(
        &self,
    ) -> Result<Vec<(String, Result<(), FleetError>)>, FleetError> {
        let pending: Vec<ProvisionedServer> = self
            .servers
            .servers()
            .await?
            .into_iter()
            .filter(|s| s.status == ProvisionStatus::Destroying)
            .collect();

        let results = join_all(pending.into_iter().map(|mut server| async move {
            let result = self.teardown(&mut server).await;
            (server.id, result)
        }))
        .await;
        Ok(results)
    }

    /// Sample proxy, disk, memory and load over a transient session. Status
    /// is never changed.
    pub async fn health_check(&self, server_id: &str) -> Result<HealthReport, FleetError> {
        let server = self.load(server_id).await?;
        let host = server
            .host
            .clone()
            .ok_or_else(|| FleetError::NotProvisioned(server_id.to_string()))?;

        let session = self.shell.connect(&host).await?;
        let (proxy_active, disk_usage, memory_usage, load_average) =
            Self::sample(session.as_ref()).await;
        session.close().await;

        let cloud_status = match server.instance_id {
            Some(id) => match self.cloud.get_instance(id).await {
                Ok(instance) => instance.status,
                Err(e) => {
                    log::warn!(server_id = %server.id, error = %e, "Failed to read cloud status");
                    UNKNOWN.to_string()
                }
            },
            None => UNKNOWN.to_string(),
        };

        // The record may have moved on while we sampled; only the timestamp
        // is written, and not at all if a teardown removed it
        let checked_at = Utc::now();
        if !self.servers.touch_health(&server.id, checked_at).await? {
            log::info!(server_id = %server.id, "Server removed during health check");
        }

        let report = HealthReport {
            server_id: server.id,
            proxy_active,
            disk_usage,
            memory_usage,
            load_average,
            cloud_status,
            checked_at,
        };
        log::info!(
            server_id = %report.server_id,
            proxy_active = report.proxy_active,
            disk = %report.disk_usage,
            memory = %report.memory_usage,
            load = %report.load_average,
            "Health check"
        );
        Ok(report)
    }

    async fn sample(session: &dyn ShellSession) -> (bool, String, String, String) {
        async fn read(session: &dyn ShellSession, command: &str) -> Option<String> {
            match session.exec(command).await {
                Ok(out) if out.success() => {
                    let value = out.stdout.trim();
                    (!value.is_empty()).then(|| value.to_string())
                }
                _ => None,
            }
        }

        let proxy_active = read(session, PROXY_STATUS_CMD).await.as_deref() == Some("active");
        let disk = read(session, DISK_USAGE_CMD).await;
        let memory = read(session, MEMORY_USAGE_CMD).await.map(|m| format!("{}%", m));
        let load = read(session, LOAD_AVERAGE_CMD).await;
        (
            proxy_active,
            disk.unwrap_or_else(|| UNKNOWN.to_string()),
            memory.unwrap_or_else(|| UNKNOWN.to_string()),
            load.unwrap_or_else(|| UNKNOWN.to_string()),
        )
    }

    /// Health-check every server that has a host; one failure does not stop
    /// the others
    pub async fn health_check_all(
        &self,
    ) -> Result<Vec<(String, Result<HealthReport, FleetError>)>, FleetError> {
        let candidates: Vec<String> = self
            .servers
            .servers()
            .await?
            .into_iter()
            .filter(|s| {
                s.host.is_some()
                    && matches!(s.status, ProvisionStatus::Ready | ProvisionStatus::Manual)
            })
            .map(|s| s.id)
            .collect();

        let results = join_all(candidates.iter().map(|id| self.health_check(id))).await;
        Ok(candidates.into_iter().zip(results).collect())
    }
}
