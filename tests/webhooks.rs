//! Webhook signature verification tests

mod common;

use common::*;
use crosscheck::providers::verify_webhook_signature;

fn current_timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// An old timestamp beyond the 5-minute tolerance
fn old_timestamp() -> String {
    (chrono::Utc::now().timestamp() - 600).to_string()
}

fn compute_signature(payload: &[u8], secret: &str, timestamp: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn signature_header(payload: &[u8], secret: &str, timestamp: &str) -> String {
    format!("t={},v1={}", timestamp, compute_signature(payload, secret, timestamp))
}

const SECRET: &str = "whsec_test_secret";
const PAYLOAD: &[u8] = b"{\"event_id\":\"evt_1\",\"event_type\":\"dispute.created\"}";

#[test]
fn test_valid_signature() {
    let timestamp = current_timestamp();
    let header = signature_header(PAYLOAD, SECRET, &timestamp);

    let result =
        verify_webhook_signature(SECRET, PAYLOAD, &header).expect("Verification should not error");
    assert!(result, "Valid signature should be accepted");
}

#[test]
fn test_invalid_signature() {
    let timestamp = current_timestamp();
    let header = signature_header(PAYLOAD, "wrong_secret", &timestamp);

    let result =
        verify_webhook_signature(SECRET, PAYLOAD, &header).expect("Verification should not error");
    assert!(!result, "Signature from the wrong secret should be rejected");
}

#[test]
fn test_modified_payload_rejected() {
    let timestamp = current_timestamp();
    let header = signature_header(PAYLOAD, SECRET, &timestamp);
    let modified = b"{\"event_id\":\"evt_1\",\"event_type\":\"dispute.created\",\"hacked\":true}";

    let result =
        verify_webhook_signature(SECRET, modified, &header).expect("Verification should not error");
    assert!(!result, "Modified payload should be rejected");
}

#[test]
fn test_old_timestamp_rejected() {
    let timestamp = old_timestamp();
    let header = signature_header(PAYLOAD, SECRET, &timestamp);

    let result =
        verify_webhook_signature(SECRET, PAYLOAD, &header).expect("Verification should not error");
    assert!(!result, "Stale timestamp should be rejected (replay prevention)");
}

#[test]
fn test_missing_timestamp_errors() {
    let result = verify_webhook_signature(SECRET, PAYLOAD, "v1=somesignature");
    assert!(result.is_err(), "Missing timestamp should error");
}

#[test]
fn test_missing_signature_errors() {
    let result = verify_webhook_signature(SECRET, PAYLOAD, "t=1234567890");
    assert!(result.is_err(), "Missing signature should error");
}

#[test]
fn test_malformed_header_errors() {
    let result = verify_webhook_signature(SECRET, PAYLOAD, "garbage");
    assert!(result.is_err(), "Malformed header should error");
}

#[test]
fn test_empty_header_errors() {
    let result = verify_webhook_signature(SECRET, PAYLOAD, "");
    assert!(result.is_err(), "Empty header should error");
}

#[test]
fn test_non_numeric_timestamp_errors() {
    let result = verify_webhook_signature(SECRET, PAYLOAD, "t=notanumber,v1=deadbeef");
    assert!(result.is_err(), "Non-numeric timestamp should error");
}

// ============ End-to-end delivery behind the signature gate ============

#[test]
fn test_verified_delivery_creates_dispute_and_replay_is_safe() {
    let mut conn = setup_test_db();
    let channel = create_test_channel(&conn, ProviderKind::Stripe);

    let event = dispute_created_event("evt_sig", "dp_sig", None);
    let body = serde_json::to_vec(&serde_json::json!({
        "event_id": event.event_id,
        "event_type": event.event_type,
        "resource": event.resource,
    }))
    .unwrap();

    // The channel secret verifies the delivery...
    let timestamp = current_timestamp();
    let header = signature_header(&body, &channel.webhook_secret, &timestamp);
    assert!(verify_webhook_signature(&channel.webhook_secret, &body, &header).unwrap());

    // ...and the ledger-guarded application is at-most-once
    deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &event)
        .expect("First delivery should apply");
    assert!(deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &event).is_none());
    assert_eq!(count_disputes(&conn, &channel.id), 1);
}
