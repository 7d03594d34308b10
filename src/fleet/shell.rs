//! Remote shell over the system `ssh` client
//!
//! A session is one multiplexed master connection (`ControlMaster`); every
//! command reuses it and `close` tears it down.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::FleetError;
use crate::logger::log;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Open shell on one host
#[async_trait]
pub trait ShellSession: Send + Sync {
    async fn exec(&self, command: &str) -> Result<CommandOutput, FleetError>;

    async fn close(&self);
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn connect(&self, host: &str) -> Result<Box<dyn ShellSession>, FleetError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub user: String,
    pub port: u16,
    pub key_path: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

pub struct SshShell {
    options: SshOptions,
}

impl SshShell {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

struct SshSession {
    host: String,
    control_path: PathBuf,
    options: SshOptions,
}

fn base_args(options: &SshOptions, control_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", options.connect_timeout.as_secs().max(1)),
        "-o".to_string(),
        format!("ControlPath={}", control_path.display()),
        "-p".to_string(),
        options.port.to_string(),
    ];
    if let Some(key) = &options.key_path {
        args.push("-i".to_string());
        args.push(key.display().to_string());
    }
    args
}

async fn run_ssh(args: Vec<String>, limit: Duration) -> Result<CommandOutput, FleetError> {
    let child = Command::new("ssh")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = timeout(limit, child)
        .await
        .map_err(|_| FleetError::Timeout(format!("ssh command exceeded {:?}", limit)))?
        .map_err(|e| FleetError::Shell(format!("Failed to spawn ssh: {}", e)))?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn connect(&self, host: &str) -> Result<Box<dyn ShellSession>, FleetError> {
        let control_path = std::env::temp_dir().join(format!("panel-fleet-{}.sock", Uuid::new_v4()));
        let mut args = base_args(&self.options, &control_path);
        args.extend([
            "-M".to_string(),
            "-f".to_string(),
            "-N".to_string(),
            format!("{}@{}", self.options.user, host),
        ]);

        let output = run_ssh(args, self.options.connect_timeout + Duration::from_secs(5)).await?;
        if !output.success() {
            return Err(FleetError::Shell(format!(
                "ssh to {} failed ({}): {}",
                host,
                output.exit_code,
                output.stderr.trim()
            )));
        }
        log::debug!(host = %host, "SSH session opened");

        Ok(Box::new(SshSession {
            host: host.to_string(),
            control_path,
            options: self.options.clone(),
        }))
    }
}

#[async_trait]
impl ShellSession for SshSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput, FleetError> {
        let mut args = base_args(&self.options, &self.control_path);
        args.push(format!("{}@{}", self.options.user, self.host));
        args.push(command.to_string());
        run_ssh(args, self.options.command_timeout).await
    }

    async fn close(&self) {
        let mut args = base_args(&self.options, &self.control_path);
        args.extend([
            "-O".to_string(),
            "exit".to_string(),
            format!("{}@{}", self.options.user, self.host),
        ]);
        if let Err(e) = run_ssh(args, self.options.command_timeout).await {
            log::warn!(host = %self.host, error = %e, "Failed to close SSH session");
        }
        let _ = std::fs::remove_file(&self.control_path);
        log::debug!(host = %self.host, "SSH session closed");
    }
}
