//! Edge server fleet: cloud instances configured over SSH
//!
//! - `status`: lifecycle states and allowed transitions
//! - `cloud`: cloud instance API
//! - `shell`: remote shell
//! - `bootstrap`: boot script and completion marker
//! - `orchestrator`: provisioning, teardown and health checks

pub mod bootstrap;
pub mod cloud;
pub mod orchestrator;
pub mod shell;
mod status;

pub use cloud::{CloudApi, DigitalOceanClient, Instance, InstanceRequest};
pub use orchestrator::{outbound_tag, FleetOrchestrator, HealthReport, ProvisionRequest};
pub use shell::{CommandOutput, RemoteShell, ShellSession, SshOptions, SshShell};
pub use status::ProvisionStatus;
