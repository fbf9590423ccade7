//! Payload signing and outbound request construction.
//!
//! Every delivery carries an HMAC-SHA256 signature over the raw request
//! body, computed with the endpoint's secret. The body is canonical JSON:
//! `serde_json`'s map type keeps keys in sorted order and serialization
//! emits no incidental whitespace, so receivers in any language can
//! reproduce the exact bytes and recompute the signature.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::EventType;

type HmacSha256 = Hmac<Sha256>;

pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const USER_AGENT_HEADER: &str = "User-Agent";

pub const USER_AGENT: &str = concat!("webhook-courier/", env!("CARGO_PKG_VERSION"));

/// Compute the HMAC-SHA256 signature over a payload.
///
/// Returns the lowercase hex digest. The same inputs always yield the same
/// signature.
pub fn compute_signature(secret: &[u8], payload: &[u8]) -> String {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature in constant time.
///
/// Accepts the bare hex digest or the `sha256=<hex>` header form. Returns
/// `false` on any mismatch or malformed input; never errors.
pub fn verify_signature(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let bare = signature_hex
        .strip_prefix("sha256=")
        .unwrap_or(signature_hex);
    let Ok(signature) = hex::decode(bare) else {
        return false;
    };

    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

/// Serialize the wire envelope `{event, timestamp, data}` canonically.
pub fn canonical_body(event_type: EventType, timestamp: u64, data: &serde_json::Value) -> Vec<u8> {
    let envelope = serde_json::json!({
        "event": event_type.as_str(),
        "timestamp": timestamp,
        "data": data,
    });
    serde_json::to_vec(&envelope).unwrap_or_default()
}

/// A fully prepared outbound request: canonical body plus signed headers.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Build the body and the full header set for one delivery.
pub fn build_signed_request(
    secret: &str,
    event_type: EventType,
    timestamp: u64,
    data: &serde_json::Value,
) -> SignedRequest {
    let body = canonical_body(event_type, timestamp, data);
    let signature = compute_signature(secret.as_bytes(), &body);

    let headers = vec![
        (CONTENT_TYPE_HEADER.to_string(), "application/json".to_string()),
        (SIGNATURE_HEADER.to_string(), format!("sha256={signature}")),
        (EVENT_TYPE_HEADER.to_string(), event_type.as_str().to_string()),
        (TIMESTAMP_HEADER.to_string(), timestamp.to_string()),
        (USER_AGENT_HEADER.to_string(), USER_AGENT.to_string()),
    ];

    SignedRequest { headers, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic() {
        let a = compute_signature(b"secret", b"payload");
        let b = compute_signature(b"secret", b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn signature_is_hex_encoded_sha256() {
        let sig = compute_signature(b"secret", b"payload");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_changes_with_payload_and_secret() {
        let base = compute_signature(b"secret", b"payload");
        assert_ne!(base, compute_signature(b"secret", b"payloae"));
        assert_ne!(base, compute_signature(b"secres", b"payload"));
    }

    #[test]
    fn verify_accepts_valid_signature() {
        let sig = compute_signature(b"secret", b"payload");
        assert!(verify_signature(b"secret", b"payload", &sig));
        assert!(verify_signature(b"secret", b"payload", &format!("sha256={sig}")));
    }

    #[test]
    fn verify_rejects_mismatch_and_garbage() {
        let sig = compute_signature(b"secret", b"payload");
        assert!(!verify_signature(b"other", b"payload", &sig));
        assert!(!verify_signature(b"secret", b"tampered", &sig));
        assert!(!verify_signature(b"secret", b"payload", "not-hex"));
        assert!(!verify_signature(b"secret", b"payload", ""));
    }

    #[test]
    fn canonical_body_has_stable_key_order() {
        let data = serde_json::json!({"zeta": 1, "alpha": {"nested_z": 2, "nested_a": 3}});
        let body = canonical_body(EventType::OrderCreated, 1_700_000_000, &data);
        let rendered = String::from_utf8(body.clone()).unwrap();

        assert_eq!(
            rendered,
            r#"{"data":{"alpha":{"nested_a":3,"nested_z":2},"zeta":1},"event":"order.created","timestamp":1700000000}"#
        );

        // Two serializations of equal values are byte-identical.
        assert_eq!(body, canonical_body(EventType::OrderCreated, 1_700_000_000, &data));
    }

    #[test]
    fn signed_request_carries_the_full_header_set() {
        let req = build_signed_request(
            "whsec_abc",
            EventType::PaymentSettled,
            1_700_000_000,
            &serde_json::json!({"amount_cents": 1250}),
        );

        let header = |name: &str| {
            req.headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        assert_eq!(header(CONTENT_TYPE_HEADER).as_deref(), Some("application/json"));
        assert_eq!(header(EVENT_TYPE_HEADER).as_deref(), Some("payment.settled"));
        assert_eq!(header(TIMESTAMP_HEADER).as_deref(), Some("1700000000"));
        assert_eq!(header(USER_AGENT_HEADER).as_deref(), Some(USER_AGENT));

        let sig = header(SIGNATURE_HEADER).unwrap();
        assert!(sig.starts_with("sha256="));
        assert!(verify_signature(b"whsec_abc", &req.body, &sig));
    }
}
