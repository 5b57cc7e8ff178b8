//! Idempotency ledger: at-most-once application of external events.
//!
//! Every externally-triggered mutation (webhook delivery, provider batch
//! ingestion) claims a ledger row before applying effects and finishes it
//! in the same database transaction. The unique (channel, scope, key) row
//! is the serialization point for concurrent deliveries: one claimant wins,
//! everyone else observes the row and backs off.

use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::db::queries;
use crate::error::Result;
use crate::models::{IdempotencyRecord, IdempotencyStatus};
use crate::providers::ProviderKind;

/// Scope for provider webhook deliveries, keyed by event id.
pub fn webhook_scope(provider: ProviderKind) -> String {
    format!("webhook:{}", provider.as_ref())
}

/// Scope for transaction batch ingestion, keyed by caller batch key.
pub fn ingest_scope(provider: ProviderKind) -> String {
    format!("ingest:{}", provider.as_ref())
}

/// SHA-256 hex of the raw request body, stored to detect payload drift on
/// redelivery.
pub fn request_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Outcome of claiming an idempotency key.
#[derive(Debug)]
pub enum Begin {
    /// This caller owns the key; apply effects, then `complete` or `fail`.
    Fresh,
    /// The event already completed; the cached result is the response.
    Duplicate(IdempotencyRecord),
    /// Another delivery is mid-flight. Respond success without effects;
    /// the provider's retry cadence covers the unlikely crash case.
    InProgress,
}

/// Lookup only, no side effects.
pub fn check(
    conn: &Connection,
    channel_id: &str,
    scope: &str,
    idem_key: &str,
) -> Result<Option<IdempotencyRecord>> {
    queries::get_idempotency_record(conn, channel_id, scope, idem_key)
}

/// Claim the key for this caller. FAILED rows are reclaimed so a retry
/// after a crash or provider outage can run the effects again.
pub fn begin(
    conn: &Connection,
    channel_id: &str,
    scope: &str,
    idem_key: &str,
    request_hash: &str,
) -> Result<Begin> {
    if queries::try_claim_idempotency_key(conn, channel_id, scope, idem_key, request_hash)? {
        return Ok(Begin::Fresh);
    }

    let Some(record) = queries::get_idempotency_record(conn, channel_id, scope, idem_key)? else {
        // Claim lost and row gone (purged between the two statements).
        // Treat as in-flight; the next retry will claim cleanly.
        return Ok(Begin::InProgress);
    };

    match record.status {
        IdempotencyStatus::Completed => Ok(Begin::Duplicate(record)),
        IdempotencyStatus::Failed => {
            if queries::reclaim_failed_idempotency_key(
                conn, channel_id, scope, idem_key, request_hash,
            )? {
                Ok(Begin::Fresh)
            } else {
                Ok(Begin::InProgress)
            }
        }
        IdempotencyStatus::InProgress => Ok(Begin::InProgress),
    }
}

/// Mark the claimed key COMPLETED, caching the result payload.
pub fn complete(
    conn: &Connection,
    channel_id: &str,
    scope: &str,
    idem_key: &str,
    result: &serde_json::Value,
) -> Result<()> {
    queries::finish_idempotency_key(
        conn,
        channel_id,
        scope,
        idem_key,
        IdempotencyStatus::Completed,
        Some(result),
    )
}

/// Mark the claimed key FAILED so a later delivery retries the effects.
pub fn fail(conn: &Connection, channel_id: &str, scope: &str, idem_key: &str) -> Result<()> {
    queries::finish_idempotency_key(
        conn,
        channel_id,
        scope,
        idem_key,
        IdempotencyStatus::Failed,
        None,
    )
}
