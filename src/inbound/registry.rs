//! Boundary conversion between raw panel records and typed inbounds
//!
//! Parsing is fail-fast: a blob that does not decode, or a record that does
//! not validate, is rejected with a `Validation` error naming the inbound and
//! the field. Nothing is partially accepted.

use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::model::{Inbound, InboundSettings, RawInbound};
use super::stream::Security;
use crate::error::{PanelError, Result};

fn invalid(inbound_id: i64, field: &str, reason: impl std::fmt::Display) -> PanelError {
    PanelError::Validation(format!("inbound {} field {}: {}", inbound_id, field, reason))
}

/// Decode a JSON-in-a-string section. Empty strings are only accepted when
/// `optional` is set and then yield the default value.
fn decode_blob<T>(inbound_id: i64, field: &str, blob: &str, optional: bool) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if blob.trim().is_empty() {
        return if optional {
            Ok(T::default())
        } else {
            Err(invalid(inbound_id, field, "empty"))
        };
    }
    serde_json::from_str(blob).map_err(|e| invalid(inbound_id, field, e))
}

/// Parse and validate one raw inbound
pub fn parse_inbound(raw: RawInbound) -> Result<Inbound> {
    let id = raw.id;

    let port = u16::try_from(raw.port)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| invalid(id, "port", format!("{} out of range 1..=65535", raw.port)))?;

    if raw.remark.trim().is_empty() {
        return Err(invalid(id, "remark", "empty"));
    }

    let settings: InboundSettings = decode_blob(id, "settings", &raw.settings, false)?;
    let stream_settings = decode_blob(id, "streamSettings", &raw.stream_settings, true)?;
    let sniffing = decode_blob(id, "sniffing", &raw.sniffing, true)?;
    let allocate = match raw.allocate.as_deref() {
        Some(blob) if !blob.trim().is_empty() => Some(
            serde_json::from_str(blob).map_err(|e| invalid(id, "allocate", e))?,
        ),
        _ => None,
    };

    let inbound = Inbound {
        id,
        up: raw.up,
        down: raw.down,
        total: raw.total,
        remark: raw.remark,
        enable: raw.enable,
        expiry_time: raw.expiry_time,
        client_stats: raw.client_stats,
        listen: raw.listen,
        port,
        protocol: raw.protocol,
        settings,
        stream_settings,
        tag: raw.tag,
        sniffing,
        allocate,
    };
    validate(&inbound)?;
    Ok(inbound)
}

/// Parse a whole listing; the first bad record fails the call
pub fn parse_inbounds(raws: Vec<RawInbound>) -> Result<Vec<Inbound>> {
    raws.into_iter().map(parse_inbound).collect()
}

/// Rules beyond what decoding enforces
pub fn validate(inbound: &Inbound) -> Result<()> {
    let id = inbound.id;

    if inbound.protocol.uses_uuid_clients() {
        for client in &inbound.settings.clients {
            Uuid::parse_str(&client.id).map_err(|_| {
                invalid(
                    id,
                    "settings.clients.id",
                    format!("'{}' is not a UUID (email {})", client.id, client.email),
                )
            })?;
        }
    }

    let stream = &inbound.stream_settings;
    match stream.security {
        Security::Reality => match &stream.reality_settings {
            None => return Err(invalid(id, "streamSettings.realitySettings", "missing")),
            Some(r) if r.private_key.is_empty() => {
                return Err(invalid(id, "streamSettings.realitySettings.privateKey", "empty"))
            }
            Some(_) => {}
        },
        Security::Tls if stream.tls_settings.is_none() => {
            return Err(invalid(id, "streamSettings.tlsSettings", "missing"));
        }
        _ => {}
    }

    Ok(())
}

/// Encode a typed inbound back into the wire shape
pub fn to_raw(inbound: &Inbound) -> Result<RawInbound> {
    let allocate = inbound
        .allocate
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    Ok(RawInbound {
        id: inbound.id,
        up: inbound.up,
        down: inbound.down,
        total: inbound.total,
        remark: inbound.remark.clone(),
        enable: inbound.enable,
        expiry_time: inbound.expiry_time,
        client_stats: inbound.client_stats.clone(),
        listen: inbound.listen.clone(),
        port: i64::from(inbound.port),
        protocol: inbound.protocol,
        settings: serde_json::to_string(&inbound.settings)?,
        stream_settings: serde_json::to_string(&inbound.stream_settings)?,
        tag: inbound.tag.clone(),
        sniffing: serde_json::to_string(&inbound.sniffing)?,
        allocate,
    })
}
