//! Inbound registry: typed model of panel listeners
//!
//! - `model`: inbound, client and statistic records
//! - `stream`: transport/security settings
//! - `registry`: fail-fast parsing of raw panel records

pub mod model;
pub mod registry;
pub mod stream;

pub use model::{
    Allocate, Client, ClientStat, Inbound, InboundSettings, Protocol, RawInbound, Sniffing,
    TelegramId,
};
pub use registry::{parse_inbound, parse_inbounds, to_raw, validate};
pub use stream::{Network, Security, StreamSettings};
