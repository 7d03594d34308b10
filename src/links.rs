//! Subscriber share links (`vmess://`, `vless://`, `trojan://`, `ss://`)

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::json;
use url::Url;

use crate::error::LinkError;
use crate::identity::make_identity_email;
use crate::inbound::{Client, Inbound, Network, Protocol, Security};
use crate::store::Subscription;

/// Connection URL for `client` on `inbound`, reached at `host`
pub fn share_link(inbound: &Inbound, client: &Client, host: &str) -> Result<String, LinkError> {
    match inbound.protocol {
        Protocol::Vmess => Ok(vmess_link(inbound, client, host)),
        Protocol::Vless => url_link("vless", &client.id, inbound, client, host),
        Protocol::Trojan => {
            let password = client
                .password
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    LinkError::Invalid(format!("client {} has no password", client.email))
                })?;
            url_link("trojan", password, inbound, client, host)
        }
        Protocol::Shadowsocks => shadowsocks_link(inbound, client, host),
        other => Err(LinkError::Unsupported(other.to_string())),
    }
}

fn remark(inbound: &Inbound, client: &Client) -> String {
    format!("{}-{}", inbound.remark, client.email)
}

fn vmess_link(inbound: &Inbound, client: &Client, host: &str) -> String {
    let stream = &inbound.stream_settings;
    let tls = match stream.security {
        Security::Tls => "tls",
        Security::Reality => "reality",
        Security::None => "",
    };
    let config = json!({
        "v": "2",
        "ps": remark(inbound, client),
        "add": host,
        "port": inbound.port.to_string(),
        "id": client.id,
        "aid": "0",
        "scy": client.security.as_deref().unwrap_or("auto"),
        "net": stream.network.as_str(),
        "type": stream.header_type(),
        "host": stream.host().unwrap_or(""),
        "path": stream.path().unwrap_or(""),
        "tls": tls,
        "sni": stream.server_name().unwrap_or(""),
    });
    format!("vmess://{}", STANDARD.encode(config.to_string()))
}

fn url_link(
    scheme: &str,
    user: &str,
    inbound: &Inbound,
    client: &Client,
    host: &str,
) -> Result<String, LinkError> {
    let mut url = Url::parse(&format!("{}://{}:{}", scheme, host, inbound.port))
        .map_err(|e| LinkError::Invalid(format!("{}: {}", host, e)))?;
    url.set_username(user)
        .map_err(|_| LinkError::Invalid(format!("cannot set user on {}", host)))?;

    let stream = &inbound.stream_settings;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("type", stream.network.as_str());
        query.append_pair("security", stream.security.as_str());
        if inbound.protocol == Protocol::Vless {
            query.append_pair("encryption", "none");
            if !client.flow.is_empty() {
                query.append_pair("flow", &client.flow);
            }
        }
        match stream.network {
            Network::Grpc => {
                if let Some(service) = stream.path() {
                    query.append_pair("serviceName", service);
                }
            }
            Network::Tcp => {
                let header = stream.header_type();
                if header != "none" {
                    query.append_pair("headerType", header);
                }
            }
            _ => {
                if let Some(path) = stream.path() {
                    query.append_pair("path", path);
                }
                if let Some(h) = stream.host() {
                    query.append_pair("host", h);
                }
            }
        }
        if let Some(sni) = stream.server_name() {
            query.append_pair("sni", sni);
        }
        if let Some(tls) = stream
            .tls_settings
            .as_ref()
            .filter(|_| stream.security == Security::Tls)
        {
            if !tls.settings.fingerprint.is_empty() {
                query.append_pair("fp", &tls.settings.fingerprint);
            }
            if !tls.alpn.is_empty() {
                query.append_pair("alpn", &tls.alpn.join(","));
            }
        }
        if let Some(reality) = stream
            .reality_settings
            .as_ref()
            .filter(|_| stream.security == Security::Reality)
        {
            query.append_pair("pbk", &reality.settings.public_key);
            if !reality.settings.fingerprint.is_empty() {
                query.append_pair("fp", &reality.settings.fingerprint);
            }
            if let Some(sid) = reality.short_ids.first() {
                query.append_pair("sid", sid);
            }
            if !reality.settings.spider_x.is_empty() {
                query.append_pair("spx", &reality.settings.spider_x);
            }
        }
    }
    url.set_fragment(Some(&remark(inbound, client)));
    Ok(url.to_string())
}

fn shadowsocks_link(inbound: &Inbound, client: &Client, host: &str) -> Result<String, LinkError> {
    let method = inbound
        .settings
        .extra
        .get("method")
        .and_then(|m| m.as_str())
        .ok_or_else(|| LinkError::Invalid(format!("inbound {} has no cipher method", inbound.id)))?;
    let password = client
        .password
        .as_deref()
        .ok_or_else(|| LinkError::Invalid(format!("client {} has no password", client.email)))?;
    let user = URL_SAFE_NO_PAD.encode(format!("{}:{}", method, password));

    let mut url = Url::parse(&format!("ss://{}:{}", host, inbound.port))
        .map_err(|e| LinkError::Invalid(format!("{}: {}", host, e)))?;
    url.set_username(&user)
        .map_err(|_| LinkError::Invalid(format!("cannot set user on {}", host)))?;
    url.set_fragment(Some(&remark(inbound, client)));
    Ok(url.to_string())
}

/// Links for every inbound holding the subscriber. Inbounds whose protocol
/// cannot be shared are skipped.
pub fn subscription_links(
    subscription: &Subscription,
    inbounds: &[Inbound],
    host: &str,
) -> Vec<(i64, String)> {
    inbounds
        .iter()
        .filter_map(|inbound| {
            let email = make_identity_email(inbound.id, &subscription.owner_email);
            let client = inbound.find_client(subscription.client_id.as_deref(), &email)?;
            share_link(inbound, client, host)
                .ok()
                .map(|link| (inbound.id, link))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::{parse_inbound, RawInbound};

    const ID: &str = "6f1b2c1e-0c4a-4b8a-9a53-9f5f0a3a1c11";

    fn create_inbound(protocol: &str, settings: &str, stream: &str) -> Inbound {
        let raw: RawInbound = serde_json::from_value(serde_json::json!({
            "id": 3,
            "remark": "edge",
            "port": 443,
            "protocol": protocol,
            "settings": settings,
            "streamSettings": stream,
            "sniffing": "",
        }))
        .unwrap();
        parse_inbound(raw).unwrap()
    }

    #[test]
    fn test_vless_reality_link() {
        let settings = format!(
            r#"{{"clients":[{{"id":"{}","email":"3-a@b.c","flow":"xtls-rprx-vision"}}],"decryption":"none"}}"#,
            ID
        );
        let stream = r#"{"network":"tcp","security":"reality","realitySettings":{
            "dest":"example.com:443","serverNames":["example.com"],"privateKey":"priv",
            "shortIds":["ab12"],"settings":{"publicKey":"pub","fingerprint":"chrome"}}}"#;
        let inbound = create_inbound("vless", &settings, stream);
        let link = share_link(&inbound, &inbound.clients()[0], "203.0.113.7").unwrap();

        assert!(link.starts_with(&format!("vless://{}@203.0.113.7:443?", ID)));
        assert!(link.contains("security=reality"));
        assert!(link.contains("pbk=pub"));
        assert!(link.contains("sid=ab12"));
        assert!(link.contains("flow=xtls-rprx-vision"));
        assert!(link.ends_with("#edge-3-a@b.c"));
    }

    #[test]
    fn test_vmess_link_is_base64_json() {
        let settings = format!(r#"{{"clients":[{{"id":"{}","email":"3-a@b.c"}}]}}"#, ID);
        let stream = r#"{"network":"ws","wsSettings":{"path":"/ws","host":"cdn.example.com"}}"#;
        let inbound = create_inbound("vmess", &settings, stream);
        let link = share_link(&inbound, &inbound.clients()[0], "edge.example.com").unwrap();

        let encoded = link.strip_prefix("vmess://").unwrap();
        let decoded: serde_json::Value =
            serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded["add"], "edge.example.com");
        assert_eq!(decoded["net"], "ws");
        assert_eq!(decoded["path"], "/ws");
        assert_eq!(decoded["host"], "cdn.example.com");
        assert_eq!(decoded["port"], "443");
    }

    #[test]
    fn test_trojan_requires_password() {
        let settings = r#"{"clients":[{"email":"3-a@b.c"}]}"#;
        let inbound = create_inbound("trojan", settings, "");
        assert!(matches!(
            share_link(&inbound, &inbound.clients()[0], "h"),
            Err(LinkError::Invalid(_))
        ));
    }

    #[test]
    fn test_shadowsocks_link() {
        let settings =
            r#"{"method":"aes-256-gcm","clients":[{"email":"3-a@b.c","password":"secret"}]}"#;
        let inbound = create_inbound("shadowsocks", settings, "");
        let link = share_link(&inbound, &inbound.clients()[0], "h.example").unwrap();
        let user = URL_SAFE_NO_PAD.encode("aes-256-gcm:secret");
        assert_eq!(link, format!("ss://{}@h.example:443#edge-3-a@b.c", user));
    }
}
