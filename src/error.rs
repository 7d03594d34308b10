//! Error types shared across the panel, store and fleet layers

use std::io;
use thiserror::Error;

/// Errors raised while talking to a panel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PanelError {
    /// Panel rejected credentials or the session expired
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Transport failure with no HTTP status (refused, reset, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Payload did not decode or validate; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-success HTTP status other than 401/403
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    /// Panel answered `success: false`
    #[error("Panel rejected request: {0}")]
    Rejected(String),

    /// Bad client configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PanelError {
    /// Transient failures are the only ones worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, PanelError::Network(_))
    }
}

impl From<serde_json::Error> for PanelError {
    fn from(err: serde_json::Error) -> Self {
        PanelError::Validation(err.to_string())
    }
}

/// Panel result alias
pub type Result<T> = std::result::Result<T, PanelError>;

/// Errors raised by local record stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// State file could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Record missing
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Errors raised by the provisioning and reconciliation services
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Panel(#[from] PanelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Subscription references a panel that is not configured
    #[error("Unknown panel: {0}")]
    UnknownPanel(String),

    #[error("Subscription not found: {0}")]
    UnknownSubscription(String),

    /// Another sync pass is running in this process
    #[error("Sync already in progress")]
    SyncInProgress,

    /// Every configured panel failed in one pass
    #[error("Sync failed on all {0} panels")]
    AllPanelsFailed(usize),
}

/// Errors raised by the fleet orchestrator
#[derive(Error, Debug)]
pub enum FleetError {
    /// Cloud API call failed
    #[error("Cloud API error: {0}")]
    Cloud(String),

    /// Remote shell failed to connect or run a command
    #[error("Remote shell error: {0}")]
    Shell(String),

    /// Polling deadline exceeded
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Illegal provisioning status change
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Record is not eligible for the operation
    #[error("Server not provisioned: {0}")]
    NotProvisioned(String),

    /// Bad fleet configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while building share links
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Unsupported protocol for share links: {0}")]
    Unsupported(String),

    /// Client lacks a field the protocol needs, or the URL would be invalid
    #[error("Invalid share link: {0}")]
    Invalid(String),
}
