//! Subscriber identities across every eligible inbound of a panel

mod limits;
mod service;

use serde::{Deserialize, Serialize};

pub use limits::{build_client, flow_for, ClientLimits, VLESS_FLOW};
pub use service::{
    IdDrift, InboundFailure, LimitsReport, MembershipReport, ProvisioningService, RemovalReport,
    ResetReport,
};

/// What to do when the panel holds a different client id than the one stored
/// locally for the same identity email
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdDriftPolicy {
    /// Adopt the panel's id and write it back
    #[default]
    SelfHeal,
    /// Keep the stored id and only report the drift
    Flag,
}
