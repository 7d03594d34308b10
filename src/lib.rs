//! Proxy panel provisioning, traffic reconciliation and edge-server fleet
//! control
//!
//! Architecture:
//! - `panel/`: session-authenticated, cached, retrying panel API client
//! - `inbound/`: typed inbound model and fail-fast parsing
//! - `provisioning/`: subscriber identities across eligible inbounds
//! - `reconcile/`: usage counters and online status into the local ledger
//! - `fleet/`: cloud instance lifecycle over a cloud API and SSH
//! - `store/`: local records
//! - `tasks`: periodic sync and health checks

pub mod config;
pub mod error;
pub mod fleet;
pub mod identity;
pub mod inbound;
pub mod links;
pub mod logger;
pub mod panel;
pub mod provisioning;
pub mod reconcile;
pub mod store;
pub mod tasks;
pub mod utils;
