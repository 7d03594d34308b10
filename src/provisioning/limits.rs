//! Plan limits as panel client fields

use crate::inbound::{Client, Protocol};
use crate::store::Subscription;
use crate::utils::bytes_to_gb;

/// Flow tag for XTLS vision on vless
pub const VLESS_FLOW: &str = "xtls-rprx-vision";

/// Fields of a panel client that follow the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientLimits {
    pub limit_ip: u32,
    /// GB, 0 = unlimited
    pub total_gb: u64,
    /// Epoch ms
    pub expiry_time: i64,
    pub enable: bool,
}

impl ClientLimits {
    pub fn from_subscription(subscription: &Subscription) -> Self {
        Self {
            limit_ip: subscription.limits.max_devices,
            total_gb: bytes_to_gb(subscription.limits.traffic_limit_bytes),
            expiry_time: subscription.end_date.timestamp_millis(),
            enable: subscription.active,
        }
    }

    /// Overwrite the limit fields, leaving identity fields alone
    pub fn apply(&self, client: &mut Client) {
        client.limit_ip = self.limit_ip;
        client.total_gb = self.total_gb;
        client.expiry_time = self.expiry_time;
        client.enable = self.enable;
    }
}

pub fn flow_for(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Vless => VLESS_FLOW,
        _ => "",
    }
}

/// New client for `subscription` on an inbound speaking `protocol`
pub fn build_client(
    subscription: &Subscription,
    client_id: &str,
    identity_email: &str,
    protocol: Protocol,
) -> Client {
    let mut client = Client::new(client_id, identity_email);
    ClientLimits::from_subscription(subscription).apply(&mut client);
    client.flow = flow_for(protocol).to_string();
    client.sub_id = subscription.id.clone();
    client.comment = Some(format!("subscription {}", subscription.id));
    if protocol == Protocol::Trojan {
        client.password = Some(client_id.to_string());
    }
    client
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PlanLimits;
    use crate::utils::gb_to_bytes;
    use chrono::{TimeZone, Utc};

    fn create_subscription() -> Subscription {
        Subscription::new(
            "sub-1",
            "alice@example.com",
            "p1",
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            PlanLimits {
                max_devices: 3,
                traffic_limit_bytes: gb_to_bytes(100),
            },
        )
    }

    #[test]
    fn test_limits_from_plan() {
        let limits = ClientLimits::from_subscription(&create_subscription());
        assert_eq!(limits.limit_ip, 3);
        assert_eq!(limits.total_gb, 100);
        assert_eq!(limits.expiry_time, 1_893_456_000_000);
        assert!(limits.enable);
    }

    #[test]
    fn test_build_vless_client() {
        let sub = create_subscription();
        let client = build_client(&sub, "cid", "7-alice@example.com", Protocol::Vless);
        assert_eq!(client.id, "cid");
        assert_eq!(client.email, "7-alice@example.com");
        assert_eq!(client.flow, VLESS_FLOW);
        assert_eq!(client.sub_id, "sub-1");
        assert!(client.password.is_none());
    }

    #[test]
    fn test_build_vmess_client_has_no_flow() {
        let client = build_client(&create_subscription(), "cid", "e", Protocol::Vmess);
        assert_eq!(client.flow, "");
    }

    #[test]
    fn test_apply_keeps_identity() {
        let mut client = Client::new("keep", "9-x@y.z");
        client.flow = VLESS_FLOW.to_string();
        ClientLimits {
            limit_ip: 1,
            total_gb: 0,
            expiry_time: 5,
            enable: false,
        }
        .apply(&mut client);
        assert_eq!(client.id, "keep");
        assert_eq!(client.email, "9-x@y.z");
        assert_eq!(client.flow, VLESS_FLOW);
        assert_eq!(client.expiry_time, 5);
        assert!(!client.enable);
    }
}
