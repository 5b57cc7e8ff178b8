//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models can implement to
//! define how they are constructed from database rows, plus helper functions
//! for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors.
///
/// This provides graceful error handling instead of panicking when the
/// database contains invalid enum values (from corruption, migration
/// errors, etc.).
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Parse a JSON TEXT column, defaulting on NULL or malformed content.
fn parse_json_list<T: serde::de::DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<Vec<T>> {
    let raw: Option<String> = row.get(col)?;
    Ok(raw
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default())
}

/// Parse an optional JSON TEXT column into a `serde_json::Value`.
fn parse_json_value(row: &Row, col: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(col)?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const CHANNEL_COLS: &str = "id, name, provider, webhook_secret, provider_api_key, created_at";

pub const ACCOUNT_COLS: &str = "id, email, email_verified, created_at";

pub const PAYMENT_METHOD_COLS: &str = "id, account_id, kind, created_at";

pub const PRODUCT_COLS: &str = "id, channel_id, name, price_cents, created_at";

pub const ORDER_COLS: &str = "id, channel_id, account_id, order_number, status, payment_method_id, total_cents, currency, created_at";

pub const ORDER_ITEM_COLS: &str = "id, order_id, product_id, quantity, unit_price_cents";

pub const SHIPMENT_COLS: &str =
    "id, order_id, carrier, tracking_number, tracking_url, delivered_at, created_at";

pub const PAYOUT_COLS: &str =
    "id, channel_id, provider, provider_payout_id, amount_cents, status, arrived_at, created_at";

pub const FRAUD_SCORE_COLS: &str =
    "id, channel_id, order_id, account_id, risk_score, risk_level, flags, reasons, created_at";

pub const DISPUTE_COLS: &str = "id, channel_id, provider, provider_case_id, order_id, status, reason, amount_cents, currency, evidence_pack_id, evidence_deadline, needs_manual, last_error, last_provider_update_at, created_at, updated_at";

pub const TIMELINE_COLS: &str = "id, dispute_id, kind, message, meta, created_at";

pub const EVIDENCE_PACK_COLS: &str = "id, dispute_id, status, tracking_number, tracking_url, delivery_proof, product_description, customer_communication, refund_policy, terms_of_service, attachments, submitted_at, submitted_by, created_at, updated_at";

pub const PROVIDER_TXN_COLS: &str = "id, channel_id, provider, provider_txn_id, txn_type, amount_cents, fee_cents, net_cents, status, provider_data, match_status, matched_order_id, matched_payout_id, matched_at, matched_by, provider_created_at, created_at";

pub const DISCREPANCY_COLS: &str = "id, channel_id, discrepancy_type, severity, description, provider_txn_id, order_id, expected_cents, actual_cents, difference_cents, status, resolved_at, resolved_by, resolution, created_at";

pub const IDEMPOTENCY_COLS: &str =
    "channel_id, scope, idem_key, request_hash, result, status, created_at, updated_at";

// ============ FromRow Implementations ============

impl FromRow for Channel {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Channel {
            id: row.get(0)?,
            name: row.get(1)?,
            provider: parse_enum(row, 2, "provider")?,
            webhook_secret: row.get(3)?,
            provider_api_key: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for Account {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Account {
            id: row.get(0)?,
            email: row.get(1)?,
            email_verified: row.get::<_, i32>(2)? != 0,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for PaymentMethod {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentMethod {
            id: row.get(0)?,
            account_id: row.get(1)?,
            kind: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            name: row.get(2)?,
            price_cents: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            account_id: row.get(2)?,
            order_number: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            payment_method_id: row.get(5)?,
            total_cents: row.get(6)?,
            currency: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for OrderItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderItem {
            id: row.get(0)?,
            order_id: row.get(1)?,
            product_id: row.get(2)?,
            quantity: row.get(3)?,
            unit_price_cents: row.get(4)?,
        })
    }
}

impl FromRow for Shipment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Shipment {
            id: row.get(0)?,
            order_id: row.get(1)?,
            carrier: row.get(2)?,
            tracking_number: row.get(3)?,
            tracking_url: row.get(4)?,
            delivered_at: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Payout {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payout {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            provider: parse_enum(row, 2, "provider")?,
            provider_payout_id: row.get(3)?,
            amount_cents: row.get(4)?,
            status: row.get(5)?,
            arrived_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for FraudScore {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FraudScore {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            order_id: row.get(2)?,
            account_id: row.get(3)?,
            risk_score: row.get(4)?,
            risk_level: parse_enum(row, 5, "risk_level")?,
            flags: parse_json_list(row, 6)?,
            reasons: parse_json_list(row, 7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for Dispute {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Dispute {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            provider: parse_enum(row, 2, "provider")?,
            provider_case_id: row.get(3)?,
            order_id: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            reason: row.get(6)?,
            amount_cents: row.get(7)?,
            currency: row.get(8)?,
            evidence_pack_id: row.get(9)?,
            evidence_deadline: row.get(10)?,
            needs_manual: row.get::<_, i32>(11)? != 0,
            last_error: row.get(12)?,
            last_provider_update_at: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

impl FromRow for DisputeTimelineEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DisputeTimelineEntry {
            id: row.get(0)?,
            dispute_id: row.get(1)?,
            kind: parse_enum(row, 2, "kind")?,
            message: row.get(3)?,
            meta: parse_json_value(row, 4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for EvidencePack {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(EvidencePack {
            id: row.get(0)?,
            dispute_id: row.get(1)?,
            status: parse_enum(row, 2, "status")?,
            tracking_number: row.get(3)?,
            tracking_url: row.get(4)?,
            delivery_proof: row.get(5)?,
            product_description: row.get(6)?,
            customer_communication: parse_json_list(row, 7)?,
            refund_policy: row.get(8)?,
            terms_of_service: row.get(9)?,
            attachments: parse_json_list(row, 10)?,
            submitted_at: row.get(11)?,
            submitted_by: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

impl FromRow for ProviderTransaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProviderTransaction {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            provider: parse_enum(row, 2, "provider")?,
            provider_txn_id: row.get(3)?,
            txn_type: row.get(4)?,
            amount_cents: row.get(5)?,
            fee_cents: row.get(6)?,
            net_cents: row.get(7)?,
            status: row.get(8)?,
            provider_data: parse_json_value(row, 9)?,
            match_status: parse_enum(row, 10, "match_status")?,
            matched_order_id: row.get(11)?,
            matched_payout_id: row.get(12)?,
            matched_at: row.get(13)?,
            matched_by: row.get(14)?,
            provider_created_at: row.get(15)?,
            created_at: row.get(16)?,
        })
    }
}

impl FromRow for ReconciliationDiscrepancy {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ReconciliationDiscrepancy {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            discrepancy_type: row.get(2)?,
            severity: parse_enum(row, 3, "severity")?,
            description: row.get(4)?,
            provider_txn_id: row.get(5)?,
            order_id: row.get(6)?,
            expected_cents: row.get(7)?,
            actual_cents: row.get(8)?,
            difference_cents: row.get(9)?,
            status: parse_enum(row, 10, "status")?,
            resolved_at: row.get(11)?,
            resolved_by: row.get(12)?,
            resolution: row.get(13)?,
            created_at: row.get(14)?,
        })
    }
}

impl FromRow for IdempotencyRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(IdempotencyRecord {
            channel_id: row.get(0)?,
            scope: row.get(1)?,
            idem_key: row.get(2)?,
            request_hash: row.get(3)?,
            result: parse_json_value(row, 4)?,
            status: parse_enum(row, 5, "status")?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}
