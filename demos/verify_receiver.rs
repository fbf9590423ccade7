//! Receiver-side walkthrough: recompute and check the signature the way an
//! external receiver would.

use webhook_courier::{build_signed_request, verify_signature, EventType, SIGNATURE_HEADER};

fn main() {
    let secret = "whsec_demo_secret";
    let payload = serde_json::json!({"order_id": "ord_123", "total_cents": 4200});

    // What the courier sends.
    let request = build_signed_request(secret, EventType::OrderCreated, 1_700_000_000, &payload);
    let signature = request
        .headers
        .iter()
        .find(|(name, _)| name == SIGNATURE_HEADER)
        .map(|(_, value)| value.clone())
        .expect("signature header");

    // What the receiver checks: HMAC-SHA256 over the raw body.
    assert!(verify_signature(secret.as_bytes(), &request.body, &signature));
    println!("signature verified: {signature}");

    // Any tampering breaks it.
    let mut tampered = request.body.clone();
    tampered[0] ^= 1;
    assert!(!verify_signature(secret.as_bytes(), &tampered, &signature));
    println!("tampered body rejected");
}
