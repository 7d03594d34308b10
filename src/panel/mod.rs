//! Panel integration
//!
//! - `transport`: HTTP seam (reqwest in production, fakes in tests)
//! - `cache`: TTL response cache
//! - `session`: login, retry, re-auth and status mapping
//! - `client`: typed operations
//! - `api`: the operations services depend on
//! - `pool`: panels by id

pub mod api;
pub mod cache;
pub mod client;
pub mod pool;
pub mod session;
pub mod transport;
pub mod types;

pub use api::PanelApi;
pub use cache::ResponseCache;
pub use client::{summarize, PanelClient};
pub use pool::PanelPool;
pub use session::{extract_session_cookie, Credentials, PanelSession, SessionConfig};
pub use transport::{HttpTransport, Method, PanelRequest, PanelResponse, PanelTransport};
pub use types::{Envelope, OnlineClient, OnlineReport, PanelSummary, ServerStatus};
