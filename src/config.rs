//! Configuration
//!
//! CLI arguments (with `PANEL_FLEET_` environment fallbacks) select the
//! config file, state directory and log level. Panels, cloud credentials and
//! polling budgets live in a TOML file.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::inbound::Protocol;
use crate::panel::SessionConfig;
use crate::provisioning::IdDriftPolicy;

/// Parse duration string (e.g., "60s", "2m", "1h") or plain seconds
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '60s', '2m', '1h' or plain seconds",
            s
        )
    })
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Secs(s) => Ok(Duration::from_secs(s)),
        Raw::Text(t) => parse_duration(&t).map_err(serde::de::Error::custom),
    }
}

/// Default data directory for state persistence
const DEFAULT_DATA_DIR: &str = "/var/lib/panel-fleet";
/// Default config file
const DEFAULT_CONFIG_FILE: &str = "/etc/panel-fleet/config.toml";

/// CLI arguments
///
/// Supports environment variables with PANEL_FLEET_ prefix
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Proxy panel provisioning, traffic sync and edge-server fleet control"
)]
#[command(rename_all = "snake_case")]
pub struct CliArgs {
    /// TOML configuration file
    #[arg(short = 'c', long = "config_file", env = "PANEL_FLEET_CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    /// Data directory for the state file (default: /var/lib/panel-fleet)
    #[arg(long, env = "PANEL_FLEET_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Log mode: trace, debug, info, warn, error (default: info)
    #[arg(long, env = "PANEL_FLEET_LOG_MODE", default_value = "info")]
    pub log_mode: String,

    /// Trace every panel request
    #[arg(long, env = "PANEL_FLEET_DEBUG", default_value_t = false)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
#[command(rename_all = "kebab-case")]
pub enum Command {
    /// One traffic reconciliation pass over every active panel
    Sync,
    /// Periodic sync and health checks until interrupted
    Run {
        /// Interval between traffic syncs
        #[arg(long, env = "PANEL_FLEET_SYNC_INTERVAL", default_value = "5m", value_parser = parse_duration)]
        sync_interval: Duration,
        /// Interval between fleet health checks
        #[arg(long, env = "PANEL_FLEET_HEALTH_INTERVAL", default_value = "10m", value_parser = parse_duration)]
        health_interval: Duration,
    },
    /// Attach a subscription to every eligible inbound of its panel
    Ensure { subscription: String },
    /// Push the subscription's current plan limits to its panel
    PushLimits { subscription: String },
    /// Remove a subscription's identities from its panel
    Remove { subscription: String },
    /// Reset a subscription's traffic counters on its panel
    ResetTraffic { subscription: String },
    /// Live per-inbound usage of a subscription
    Usage { subscription: String },
    /// Load subscriptions from a JSON array into the state file
    Import { file: PathBuf },
    /// Show which identities of a subscription are online
    Online { subscription: String },
    /// List the inbounds of a panel
    Inbounds { panel: String },
    /// Print connection links for a subscription
    Links { subscription: String },
    /// Create a new edge server
    Provision {
        #[arg(long)]
        name: String,
        #[arg(long)]
        location: String,
        #[arg(long)]
        region: String,
        #[arg(long)]
        size: String,
    },
    /// Tear down an edge server
    Destroy { server: String },
    /// Sample health of an edge server
    Health { server: String },
    /// List edge servers
    Servers,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the CLI arguments
    pub fn validate(&self) -> Result<()> {
        if self.config_file.as_os_str().is_empty() {
            return Err(anyhow!("Config file path is required (--config_file)"));
        }
        if let Command::Run {
            sync_interval,
            health_interval,
        } = &self.command
        {
            if sync_interval.is_zero() {
                return Err(anyhow!("sync_interval must be greater than 0"));
            }
            if health_interval.is_zero() {
                return Err(anyhow!("health_interval must be greater than 0"));
            }
        }
        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join(crate::store::STATE_FILE)
    }
}

/// One panel entry of the config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PanelConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
    /// Host put into subscriber links; defaults to the URL host
    #[serde(default)]
    pub public_host: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Accept self-signed panel certificates
    #[serde(default)]
    pub allow_insecure: bool,
}

fn default_true() -> bool {
    true
}

/// Panel request behaviour
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub cache_ttl: Duration,
    pub max_retries: u32,
    #[serde(deserialize_with = "de_duration")]
    pub retry_delay: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            timeout: session.timeout,
            cache_ttl: session.cache_ttl,
            max_retries: session.max_retries,
            retry_delay: session.retry_delay,
        }
    }
}

impl RequestConfig {
    pub fn session_config(&self, debug: bool) -> SessionConfig {
        SessionConfig {
            timeout: self.timeout,
            cache_ttl: self.cache_ttl,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            debug,
        }
    }
}

/// Which inbounds receive subscribers and how id drift is handled
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub protocols: Vec<Protocol>,
    pub drift_policy: IdDriftPolicy,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            protocols: vec![Protocol::Vless, Protocol::Vmess],
            drift_policy: IdDriftPolicy::default(),
        }
    }
}

/// Cloud, SSH and polling settings for edge servers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub api_url: String,
    pub api_token: String,
    /// SSH key fingerprints installed on new instances
    pub ssh_key_fingerprints: Vec<String>,
    pub ssh_user: String,
    pub ssh_key_path: Option<PathBuf>,
    pub ssh_port: u16,
    /// Instance names are `{prefix}-{region}-{unix_ms}`
    pub name_prefix: String,
    pub image: String,
    pub tags: Vec<String>,
    /// Inclusive port range opened for the proxy runtime
    pub proxy_ports: (u16, u16),
    #[serde(deserialize_with = "de_duration")]
    pub instance_poll_interval: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub instance_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub install_poll_interval: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub install_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub api_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub command_timeout: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.digitalocean.com".to_string(),
            api_token: String::new(),
            ssh_key_fingerprints: Vec::new(),
            ssh_user: "root".to_string(),
            ssh_key_path: None,
            ssh_port: 22,
            name_prefix: "edge".to_string(),
            image: "ubuntu-22-04-x64".to_string(),
            tags: vec!["vpn-server".to_string()],
            proxy_ports: (8080, 8443),
            instance_poll_interval: Duration::from_secs(5),
            instance_timeout: Duration::from_secs(300),
            install_poll_interval: Duration::from_secs(10),
            install_timeout: Duration::from_secs(600),
            api_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl FleetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_token.is_empty() {
            return Err(anyhow!("fleet.api_token is required"));
        }
        if self.ssh_key_fingerprints.is_empty() {
            return Err(anyhow!("fleet.ssh_key_fingerprints must list at least one key"));
        }
        if self.proxy_ports.0 == 0 || self.proxy_ports.0 > self.proxy_ports.1 {
            return Err(anyhow!(
                "fleet.proxy_ports must be an ascending range, got {:?}",
                self.proxy_ports
            ));
        }
        if self.instance_poll_interval.is_zero() || self.install_poll_interval.is_zero() {
            return Err(anyhow!("fleet poll intervals must be greater than 0"));
        }
        if self.install_timeout < self.install_poll_interval {
            return Err(anyhow!("fleet.install_timeout is shorter than one poll interval"));
        }
        Ok(())
    }
}

/// Contents of the TOML config file
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub panels: Vec<PanelConfig>,
    pub request: RequestConfig,
    pub provisioning: ProvisioningConfig,
    pub fleet: Option<FleetConfig>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| anyhow!("TOML parse error: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids = std::collections::HashSet::new();
        for panel in &self.panels {
            if panel.id.is_empty() {
                return Err(anyhow!("Panel id must not be empty"));
            }
            if !ids.insert(panel.id.as_str()) {
                return Err(anyhow!("Duplicate panel id: {}", panel.id));
            }
            url::Url::parse(&panel.url)
                .map_err(|e| anyhow!("Panel {} has an invalid url: {}", panel.id, e))?;
            if panel.username.is_empty() || panel.password.is_empty() {
                return Err(anyhow!("Panel {} requires username and password", panel.id));
            }
        }
        if self.request.timeout.is_zero() {
            return Err(anyhow!("request.timeout must be greater than 0"));
        }
        if self.provisioning.protocols.is_empty() {
            return Err(anyhow!("provisioning.protocols must not be empty"));
        }
        if let Some(fleet) = &self.fleet {
            fleet.validate()?;
        }
        Ok(())
    }

    pub fn panel(&self, id: &str) -> Option<&PanelConfig> {
        self.panels.iter().find(|p| p.id == id)
    }

    pub fn active_panels(&self) -> impl Iterator<Item = &PanelConfig> {
        self.panels.iter().filter(|p| p.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[panels]]
id = "de-1"
name = "Frankfurt"
url = "https://panel.example.com:2053"
username = "admin"
password = "secret"

[request]
timeout = "15s"
max_retries = 2
retry_delay = "500ms"

[provisioning]
protocols = ["vless", "vmess", "trojan"]
drift_policy = "flag"

[fleet]
api_token = "dop_v1_x"
ssh_key_fingerprints = ["aa:bb"]
install_timeout = "15m"
"#;

    fn create_test_cli_args() -> CliArgs {
        CliArgs {
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            log_mode: "info".to_string(),
            debug: false,
            command: Command::Run {
                sync_interval: Duration::from_secs(300),
                health_interval: Duration::from_secs(600),
            },
        }
    }

    #[test]
    fn test_parse_sample_config() {
        let config = FileConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.panels.len(), 1);
        assert!(config.panels[0].active);
        assert_eq!(config.request.timeout, Duration::from_secs(15));
        assert_eq!(config.request.retry_delay, Duration::from_millis(500));
        assert_eq!(config.request.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.provisioning.drift_policy, IdDriftPolicy::Flag);
        assert_eq!(config.provisioning.protocols.len(), 3);

        let fleet = config.fleet.unwrap();
        assert_eq!(fleet.install_timeout, Duration::from_secs(900));
        assert_eq!(fleet.install_poll_interval, Duration::from_secs(10));
        assert_eq!(fleet.image, "ubuntu-22-04-x64");
    }

    #[test]
    fn test_defaults_without_sections() {
        let config = FileConfig::parse("").unwrap();
        assert!(config.panels.is_empty());
        assert_eq!(
            config.provisioning.protocols,
            vec![Protocol::Vless, Protocol::Vmess]
        );
        assert_eq!(config.provisioning.drift_policy, IdDriftPolicy::SelfHeal);
        assert!(config.fleet.is_none());
    }

    #[test]
    fn test_duplicate_panel_ids_rejected() {
        let twice = format!("{}\n{}", SAMPLE, &SAMPLE[..SAMPLE.find("[request]").unwrap()]);
        assert!(FileConfig::parse(&twice).is_err());
    }

    #[test]
    fn test_invalid_panel_url_rejected() {
        let bad = SAMPLE.replace("https://panel.example.com:2053", "not a url");
        assert!(FileConfig::parse(&bad).is_err());
    }

    #[test]
    fn test_fleet_requires_token() {
        let bad = SAMPLE.replace("api_token = \"dop_v1_x\"", "");
        assert!(FileConfig::parse(&bad).is_err());
    }

    #[test]
    fn test_session_config_from_request() {
        let config = FileConfig::parse(SAMPLE).unwrap();
        let session = config.request.session_config(true);
        assert_eq!(session.max_retries, 2);
        assert!(session.debug);
    }

    #[test]
    fn test_cli_args_validate_success() {
        assert!(create_test_cli_args().validate().is_ok());
    }

    #[test]
    fn test_cli_args_validate_zero_interval() {
        let mut cli = create_test_cli_args();
        cli.command = Command::Run {
            sync_interval: Duration::ZERO,
            health_interval: Duration::from_secs(1),
        };
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_cli_parses_subcommand() {
        let cli = CliArgs::try_parse_from(["panel-fleet", "--log_mode", "debug", "ensure", "sub-1"])
            .unwrap();
        assert_eq!(cli.log_mode, "debug");
        assert_eq!(
            cli.command,
            Command::Ensure {
                subscription: "sub-1".to_string()
            }
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = FileConfig::load(&path).unwrap();
        assert!(config.panel("de-1").is_some());
        assert_eq!(config.active_panels().count(), 1);
        assert!(FileConfig::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("120").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_state_file_under_data_dir() {
        let cli = create_test_cli_args();
        assert_eq!(
            cli.state_file(),
            PathBuf::from(DEFAULT_DATA_DIR).join(crate::store::STATE_FILE)
        );
    }
}
