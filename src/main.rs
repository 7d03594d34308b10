//! Operator binary: wires the library to a TOML config file and a JSON state
//! file

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use panel_fleet::config::{self, CliArgs, Command, FileConfig};
use panel_fleet::fleet::{
    DigitalOceanClient, FleetOrchestrator, ProvisionRequest, SshOptions, SshShell,
};
use panel_fleet::links::subscription_links;
use panel_fleet::logger::{self, log};
use panel_fleet::panel::{summarize, Credentials, PanelApi, PanelClient, PanelPool};
use panel_fleet::provisioning::ProvisioningService;
use panel_fleet::reconcile::TrafficReconciliationService;
use panel_fleet::store::{StateStore, Subscription, SubscriptionStore};
use panel_fleet::tasks::{sync_once, BackgroundTasks, TaskConfig};
use panel_fleet::utils::{format_bytes, get_hostname};

struct App {
    file: FileConfig,
    store: Arc<StateStore>,
    panels: Arc<PanelPool>,
    provisioning: ProvisioningService,
    reconcile: Arc<TrafficReconciliationService>,
    fleet: Option<Arc<FleetOrchestrator>>,
}

impl App {
    fn build(cli: &CliArgs, file: FileConfig) -> Result<Self> {
        let store = Arc::new(StateStore::open(cli.state_file())?);

        let session_config = file.request.session_config(cli.debug);
        let mut pool = PanelPool::new();
        for panel in file.active_panels() {
            let client = PanelClient::connect(
                panel.name.clone(),
                &panel.url,
                Credentials::new(&panel.username, &panel.password),
                session_config.clone(),
                panel.allow_insecure,
            )?;
            pool.insert(panel.id.clone(), Arc::new(client));
        }
        let panels = Arc::new(pool);

        let provisioning = ProvisioningService::new(
            Arc::clone(&panels),
            store.clone(),
            file.provisioning.clone(),
        );
        let reconcile = Arc::new(TrafficReconciliationService::new(
            Arc::clone(&panels),
            store.clone(),
            store.clone(),
        ));

        let fleet = match &file.fleet {
            Some(fleet) => {
                let cloud =
                    DigitalOceanClient::new(&fleet.api_url, &fleet.api_token, fleet.api_timeout)?;
                let shell = SshShell::new(SshOptions {
                    user: fleet.ssh_user.clone(),
                    port: fleet.ssh_port,
                    key_path: fleet.ssh_key_path.clone(),
                    connect_timeout: Duration::from_secs(10),
                    command_timeout: fleet.command_timeout,
                });
                Some(Arc::new(FleetOrchestrator::new(
                    Arc::new(cloud),
                    Arc::new(shell),
                    store.clone(),
                    fleet.clone(),
                )))
            }
            None => None,
        };

        Ok(Self {
            file,
            store,
            panels,
            provisioning,
            reconcile,
            fleet,
        })
    }

    fn fleet(&self) -> Result<&FleetOrchestrator> {
        self.fleet
            .as_deref()
            .ok_or_else(|| anyhow!("No [fleet] section in the config file"))
    }

    async fn subscription(&self, id: &str) -> Result<Subscription> {
        self.store
            .subscription(id)
            .await?
            .ok_or_else(|| anyhow!("Subscription not found: {}", id))
    }

    fn panel(&self, id: &str) -> Result<Arc<dyn PanelApi>> {
        self.panels
            .get(id)
            .ok_or_else(|| anyhow!("Unknown or inactive panel: {}", id))
    }

    /// Host for share links: configured public host, else the panel URL host
    fn public_host(&self, panel_id: &str) -> Result<String> {
        let panel = self
            .file
            .panel(panel_id)
            .ok_or_else(|| anyhow!("Unknown panel: {}", panel_id))?;
        if let Some(host) = &panel.public_host {
            return Ok(host.clone());
        }
        url::Url::parse(&panel.url)?
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Panel {} URL has no host", panel_id))
    }

    async fn dispatch(&self, command: Command) -> Result<()> {
        match command {
            Command::Sync => {
                sync_once(&self.reconcile).await?;
            }
            Command::Run {
                sync_interval,
                health_interval,
            } => {
                self.run(TaskConfig::new(sync_interval, health_interval)).await;
            }
            Command::Ensure { subscription } => {
                let report = self.provisioning.ensure_membership_by_id(&subscription).await?;
                println!(
                    "client {}: eligible {}, present {}, created {}, errors {}, drift {}",
                    report.client_id,
                    report.eligible,
                    report.already_present,
                    report.created,
                    report.errors.len(),
                    report.drift.len()
                );
                if !report.success() {
                    return Err(anyhow!("No inbound holds subscription {}", subscription));
                }
            }
            Command::PushLimits { subscription } => {
                let report = self.provisioning.push_limits(&subscription).await?;
                match report.fell_back {
                    Some(m) => println!("nothing held the identity; created {}", m.created),
                    None => println!(
                        "holding {}, updated {}, errors {}",
                        report.holding,
                        report.updated,
                        report.errors.len()
                    ),
                }
            }
            Command::Remove { subscription } => {
                let report = self.provisioning.remove_identity(&subscription).await?;
                println!(
                    "holding {}, removed {}, errors {}",
                    report.holding,
                    report.removed,
                    report.errors.len()
                );
            }
            Command::ResetTraffic { subscription } => {
                let report = self.provisioning.reset_traffic(&subscription).await?;
                println!(
                    "holding {}, reset {}, errors {}",
                    report.holding,
                    report.reset,
                    report.errors.len()
                );
            }
            Command::Online { subscription } => {
                let sub = self.subscription(&subscription).await?;
                let status = self.reconcile.online_status(&sub).await?;
                println!(
                    "online: {} ({} of {} identities)",
                    status.online,
                    status.online_emails.len(),
                    status.identities
                );
                for email in status.online_emails {
                    println!("  {}", email);
                }
            }
            Command::Usage { subscription } => {
                let sub = self.subscription(&subscription).await?;
                let report = self.reconcile.usage_report(&sub).await?;
                for usage in &report.inbounds {
                    println!(
                        "{:>6}  {:<40} up {:>10}  down {:>10}",
                        usage.inbound_id,
                        usage.email,
                        format_bytes(usage.up),
                        format_bytes(usage.down)
                    );
                }
                println!("total {}", format_bytes(report.total));
            }
            Command::Inbounds { panel } => {
                let inbounds = self.panel(&panel)?.list_inbounds(true).await?;
                for inbound in &inbounds {
                    println!(
                        "{:>6}  {:<12} {:>5}  {:<8} clients {:>4}  {}",
                        inbound.id,
                        inbound.protocol,
                        inbound.port,
                        if inbound.enable { "enabled" } else { "disabled" },
                        inbound.clients().len(),
                        inbound.remark
                    );
                }
                let summary = summarize(&inbounds, Utc::now().timestamp_millis());
                println!(
                    "{} inbounds ({} enabled), {} clients ({} expired), up {}, down {}",
                    summary.inbounds,
                    summary.enabled_inbounds,
                    summary.clients,
                    summary.expired_clients,
                    format_bytes(summary.up),
                    format_bytes(summary.down)
                );
            }
            Command::Links { subscription } => {
                let sub = self.subscription(&subscription).await?;
                let host = self.public_host(&sub.panel_id)?;
                let inbounds = self.panel(&sub.panel_id)?.list_inbounds(true).await?;
                for (_, link) in subscription_links(&sub, &inbounds, &host) {
                    println!("{}", link);
                }
            }
            Command::Import { file } => {
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {:?}", file))?;
                let subscriptions: Vec<Subscription> = serde_json::from_str(&content)?;
                for sub in &subscriptions {
                    self.store.save_subscription(sub).await?;
                }
                log::info!(count = subscriptions.len(), "Subscriptions imported");
            }
            Command::Provision {
                name,
                location,
                region,
                size,
            } => {
                let server = self
                    .fleet()?
                    .provision(ProvisionRequest {
                        name,
                        location,
                        region,
                        size,
                    })
                    .await?;
                println!(
                    "{} {} {}",
                    server.id,
                    server.status,
                    server.host.unwrap_or_default()
                );
            }
            Command::Destroy { server } => {
                self.fleet()?.destroy(&server).await?;
                println!("{} destroyed", server);
            }
            Command::Health { server } => {
                let report = self.fleet()?.health_check(&server).await?;
                println!(
                    "proxy {}, disk {}, memory {}, load {}, cloud {}",
                    if report.proxy_active { "active" } else { "inactive" },
                    report.disk_usage,
                    report.memory_usage,
                    report.load_average,
                    report.cloud_status
                );
            }
            Command::Servers => {
                for server in self.fleet()?.list().await? {
                    println!(
                        "{}  {:<12} {:<20} {}",
                        server.id,
                        server.status,
                        server.name,
                        server.host.unwrap_or_default()
                    );
                }
            }
        }
        Ok(())
    }

    async fn run(&self, task_config: TaskConfig) {
        let handle = BackgroundTasks::new(
            task_config,
            Arc::clone(&self.reconcile),
            self.fleet.clone(),
        )
        .start();

        // Create cancellation token for graceful shutdown
        let cancel_token = CancellationToken::new();
        let cancel_token_clone = cancel_token.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            cancel_token_clone.cancel();
        });

        cancel_token.cancelled().await;
        handle.shutdown().await;
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {
                        log::info!("SIGINT received, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        log::info!("SIGTERM received, shutting down...");
                    }
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                log::warn!(error = %e, "Failed to install signal handlers, using ctrl-c");
            }
        }
    }

    tokio::signal::ctrl_c().await.ok();
    log::info!("Shutdown signal received...");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = config::CliArgs::parse_args();
    cli.validate()?;

    // Initialize logger
    logger::init_logger(&cli.log_mode);

    let file = FileConfig::load(&cli.config_file)?;
    log::info!(
        host = %get_hostname(),
        config = %cli.config_file.display(),
        panels = file.active_panels().count(),
        fleet = file.fleet.is_some(),
        "Starting panel-fleet"
    );

    let app = App::build(&cli, file)?;
    app.dispatch(cli.command.clone()).await
}
