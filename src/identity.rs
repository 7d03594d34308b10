//! Collision-safe identity emails
//!
//! Panels refuse to attach the same client email to more than one inbound.
//! Every identity is therefore prefixed with its inbound id, which makes
//! `(inbound_id, email)` unique within a panel by construction.

/// Split `"{digits}-{rest}"` into its parts
fn split_prefix(identity: &str) -> Option<(&str, &str)> {
    let (id, rest) = identity.split_once('-')?;
    if id.is_empty() || rest.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((id, rest))
}

/// Keep only characters panels accept in an email field
pub fn sanitize_email(email: &str) -> String {
    email
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '+' | '-'))
        .collect()
}

/// `make_identity_email(42, "alice@example.com") == "42-alice@example.com"`
pub fn make_identity_email(inbound_id: i64, owner_email: &str) -> String {
    format!("{}-{}", inbound_id, sanitize_email(owner_email))
}

/// Strip the inbound prefix, if present
pub fn extract_owner_email(identity: &str) -> Option<&str> {
    split_prefix(identity).map(|(_, rest)| rest)
}

/// Inbound id encoded in the prefix, if present
pub fn extract_inbound_id(identity: &str) -> Option<i64> {
    split_prefix(identity).and_then(|(id, _)| id.parse().ok())
}

pub fn has_inbound_prefix(identity: &str) -> bool {
    split_prefix(identity).is_some()
}

/// Best-effort owner email: the stripped form, or the identity itself
pub fn owner_email_of(identity: &str) -> &str {
    extract_owner_email(identity).unwrap_or(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_identity_email() {
        assert_eq!(
            make_identity_email(42, "alice@example.com"),
            "42-alice@example.com"
        );
    }

    #[test]
    fn test_sanitize_drops_disallowed_chars() {
        assert_eq!(sanitize_email("bob smith!@ex ample.com"), "bobsmith@example.com");
        assert_eq!(sanitize_email("a.b_c+d-e@x.io"), "a.b_c+d-e@x.io");
    }

    #[test]
    fn test_round_trip() {
        for email in ["alice@example.com", "x+tag@mail.co", "9-lives@cat.io"] {
            let identity = make_identity_email(7, email);
            assert_eq!(extract_owner_email(&identity), Some(email));
            assert_eq!(extract_inbound_id(&identity), Some(7));
        }
    }

    #[test]
    fn test_distinct_inbounds_never_collide() {
        let a = make_identity_email(1, "alice@example.com");
        let b = make_identity_email(2, "alice@example.com");
        assert_ne!(a, b);
    }

    #[test]
    fn test_unprefixed_identity() {
        assert!(!has_inbound_prefix("alice@example.com"));
        assert_eq!(extract_owner_email("alice@example.com"), None);
        assert_eq!(owner_email_of("alice@example.com"), "alice@example.com");
        assert_eq!(extract_inbound_id("x-alice@example.com"), None);
    }
}
