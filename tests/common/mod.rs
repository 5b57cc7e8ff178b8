//! Test utilities and fixtures for Crosscheck integration tests

#![allow(dead_code)]

use rusqlite::Connection;

pub use crosscheck::db::{init_db, queries};
pub use crosscheck::disputes::{self, WebhookEvent, WebhookOutcome};
pub use crosscheck::error::AppError;
pub use crosscheck::idempotency::{self, Begin};
pub use crosscheck::models::*;
pub use crosscheck::providers::ProviderKind;
pub use crosscheck::recon;

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Create a test channel on the given provider
pub fn create_test_channel(conn: &Connection, provider: ProviderKind) -> Channel {
    let input = CreateChannel {
        name: "Test Channel".to_string(),
        provider,
        webhook_secret: "whsec_test_secret".to_string(),
        provider_api_key: "sk_test_xxx".to_string(),
    };
    queries::create_channel(conn, &input).expect("Failed to create test channel")
}

/// Create a test account with a backdated creation timestamp
pub fn create_test_account(
    conn: &Connection,
    email: &str,
    email_verified: bool,
    age_secs: i64,
) -> Account {
    let input = CreateAccount {
        email: email.to_string(),
        email_verified,
        created_at: Some(now() - age_secs),
    };
    queries::create_account(conn, &input).expect("Failed to create test account")
}

/// Create a test payment method with a backdated creation timestamp
pub fn create_test_payment_method(
    conn: &Connection,
    account_id: &str,
    age_secs: i64,
) -> PaymentMethod {
    queries::create_payment_method(conn, account_id, "card", Some(now() - age_secs))
        .expect("Failed to create test payment method")
}

pub fn create_test_product(
    conn: &Connection,
    channel_id: &str,
    name: &str,
    price_cents: i64,
) -> Product {
    queries::create_product(conn, channel_id, name, price_cents)
        .expect("Failed to create test product")
}

/// Create a single-line order with the given age
pub fn create_test_order(
    conn: &Connection,
    channel_id: &str,
    account_id: &str,
    order_number: &str,
    status: OrderStatus,
    payment_method_id: Option<&str>,
    product_id: &str,
    quantity: i64,
    unit_price_cents: i64,
    age_secs: i64,
) -> Order {
    queries::create_order(
        conn,
        &queries::CreateOrder {
            channel_id,
            account_id,
            order_number,
            status,
            payment_method_id,
            currency: "usd",
            items: vec![(product_id.to_string(), quantity, unit_price_cents)],
            created_at: Some(now() - age_secs),
        },
    )
    .expect("Failed to create test order")
}

/// Create an open dispute directly (bypassing the webhook path)
pub fn create_test_dispute(
    conn: &Connection,
    channel_id: &str,
    provider: ProviderKind,
    provider_case_id: &str,
    order_id: Option<&str>,
) -> Dispute {
    queries::try_create_dispute(
        conn,
        &CreateDispute {
            channel_id: channel_id.to_string(),
            provider,
            provider_case_id: provider_case_id.to_string(),
            order_id: order_id.map(String::from),
            reason: "fraudulent".to_string(),
            amount_cents: 9_000,
            currency: "usd".to_string(),
            evidence_deadline: Some(now() + 14 * 86400),
        },
    )
    .expect("Failed to create test dispute")
    .expect("Dispute for this case already exists")
}

/// A dispute.created webhook event payload
pub fn dispute_created_event(event_id: &str, case_id: &str, order_number: Option<&str>) -> WebhookEvent {
    let mut resource = serde_json::json!({
        "id": case_id,
        "amount_cents": 9_000,
        "currency": "usd",
        "reason": "fraudulent",
        "evidence_due_by": now() + 14 * 86400,
    });
    if let Some(number) = order_number {
        resource["order_number"] = serde_json::Value::String(number.to_string());
    }
    WebhookEvent {
        event_id: event_id.to_string(),
        event_type: "dispute.created".to_string(),
        resource,
    }
}

/// Replicate the webhook handler's ledger-guarded delivery: claim the
/// event key, apply the event and cache the summary in one transaction.
/// Returns None when the ledger short-circuited (duplicate/in-progress).
pub fn deliver_webhook(
    conn: &mut Connection,
    channel_id: &str,
    provider: ProviderKind,
    event: &WebhookEvent,
) -> Option<WebhookOutcome> {
    let scope = idempotency::webhook_scope(provider);
    let body = serde_json::to_vec(&serde_json::json!({
        "event_id": event.event_id,
        "event_type": event.event_type,
        "resource": event.resource,
    }))
    .unwrap();
    let hash = idempotency::request_hash(&body);

    let tx = conn.transaction().expect("Failed to start transaction");
    match idempotency::begin(&tx, channel_id, &scope, &event.event_id, &hash)
        .expect("Ledger claim failed")
    {
        Begin::Fresh => {}
        Begin::Duplicate(_) | Begin::InProgress => return None,
    }

    let outcome = disputes::apply_webhook_event(&tx, channel_id, provider, event)
        .expect("Webhook application failed");
    idempotency::complete(&tx, channel_id, &scope, &event.event_id, &outcome.summary())
        .expect("Ledger completion failed");
    tx.commit().expect("Failed to commit");

    Some(outcome)
}

/// Count dispute rows for a channel
pub fn count_disputes(conn: &Connection, channel_id: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM disputes WHERE channel_id = ?1",
        [channel_id],
        |row| row.get(0),
    )
    .expect("Count failed")
}
