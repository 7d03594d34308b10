//! Edge server lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisionStatus {
    /// Registered by hand, never touched by the orchestrator
    Manual,
    Provisioning,
    Installing,
    Configuring,
    Ready,
    Error,
    Destroying,
}

impl ProvisionStatus {
    pub const ALL: [ProvisionStatus; 7] = [
        ProvisionStatus::Manual,
        ProvisionStatus::Provisioning,
        ProvisionStatus::Installing,
        ProvisionStatus::Configuring,
        ProvisionStatus::Ready,
        ProvisionStatus::Error,
        ProvisionStatus::Destroying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::Provisioning => "PROVISIONING",
            Self::Installing => "INSTALLING",
            Self::Configuring => "CONFIGURING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
            Self::Destroying => "DESTROYING",
        }
    }

    /// Ready is only reachable through Configuring; a record still being
    /// created cannot be torn down until it settles.
    pub fn can_transition_to(&self, next: ProvisionStatus) -> bool {
        use ProvisionStatus::*;
        matches!(
            (self, next),
            (Provisioning, Installing)
                | (Provisioning, Error)
                | (Installing, Configuring)
                | (Installing, Error)
                | (Installing, Destroying)
                | (Configuring, Ready)
                | (Configuring, Error)
                | (Configuring, Destroying)
                | (Ready, Destroying)
                | (Ready, Error)
                | (Error, Destroying)
                | (Manual, Destroying)
                | (Destroying, Error)
        )
    }

    /// Eligible for a teardown request
    pub fn can_destroy(&self) -> bool {
        self.can_transition_to(ProvisionStatus::Destroying)
    }
}

impl fmt::Display for ProvisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
