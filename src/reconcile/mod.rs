//! Usage counters and online status pulled from panels into the local ledger

mod service;

pub use service::{
    InboundUsage, OnlineStatus, PanelSyncReport, TrafficReconciliationService, UsageReport,
};
