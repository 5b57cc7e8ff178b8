//! Reconciliation engine.
//!
//! Ingests provider-reported money movements, auto-matches them against
//! internal orders by reference extraction, and raises discrepancies for
//! unexplained differences. Ingestion is idempotent per external id; the
//! auto-matcher never guesses - a transaction with no resolvable reference
//! stays UNMATCHED for manual review.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{msg, AppError, OptionExt, Result};
use crate::models::{
    AutoMatchSummary, CreateDiscrepancy, IngestSummary, IngestTransaction, ProviderTransaction,
    ReconciliationDiscrepancy,
};
use crate::providers::ProviderKind;

/// Default scan size for one auto-match pass.
pub const DEFAULT_AUTO_MATCH_LIMIT: i64 = 200;

/// Ingest a batch of provider transactions.
///
/// Each row is inserted with `INSERT OR IGNORE` on the
/// (channel, provider, provider_txn_id) unique index: re-delivery of the
/// same batch, or overlap between batches, counts duplicates instead of
/// failing. The whole batch commits atomically.
pub fn ingest(
    conn: &mut Connection,
    channel_id: &str,
    provider: ProviderKind,
    transactions: &[IngestTransaction],
) -> Result<IngestSummary> {
    let tx = conn.transaction()?;

    let mut summary = IngestSummary::default();
    for txn in transactions {
        if txn.provider_txn_id.is_empty() {
            return Err(AppError::Validation("provider_txn_id must not be empty".into()));
        }
        if queries::try_insert_provider_transaction(&tx, channel_id, provider, txn)? {
            summary.inserted += 1;
        } else {
            summary.duplicates += 1;
        }
    }

    tx.commit()?;

    tracing::info!(
        "Ingested {} transactions for channel {} ({} duplicates skipped)",
        summary.inserted,
        channel_id,
        summary.duplicates
    );
    Ok(summary)
}

/// Extract an order reference from opaque provider metadata.
///
/// Checked fields in priority order: reference id, invoice id, custom id.
/// Every read handles absence explicitly; a blank value counts as absent.
pub fn extract_reference(provider_data: Option<&serde_json::Value>) -> Option<String> {
    let data = provider_data?;
    for field in ["reference_id", "invoice_id", "custom_id"] {
        if let Some(value) = data.get(field).and_then(|v| v.as_str()) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// One auto-match pass over UNMATCHED transactions.
///
/// A transaction matches when its extracted reference equals an order
/// number on the same channel; everything else is left for manual review.
/// Per-item failures are logged and skipped, never aborting the pass.
pub fn auto_match(
    conn: &Connection,
    channel_id: &str,
    provider: Option<ProviderKind>,
    limit: i64,
) -> Result<AutoMatchSummary> {
    let candidates = queries::list_unmatched_transactions(conn, channel_id, provider, limit)?;

    let mut summary = AutoMatchSummary {
        scanned: candidates.len() as i64,
        ..Default::default()
    };

    for txn in candidates {
        match try_auto_match_one(conn, channel_id, &txn) {
            Ok(true) => summary.matched += 1,
            Ok(false) => summary.unmatched += 1,
            Err(e) => {
                tracing::warn!("Auto-match failed for transaction {}: {}", txn.id, e);
                summary.unmatched += 1;
            }
        }
    }

    tracing::info!(
        "Auto-match pass on channel {}: {} scanned, {} matched",
        channel_id,
        summary.scanned,
        summary.matched
    );
    Ok(summary)
}

fn try_auto_match_one(
    conn: &Connection,
    channel_id: &str,
    txn: &ProviderTransaction,
) -> Result<bool> {
    let Some(reference) = extract_reference(txn.provider_data.as_ref()) else {
        return Ok(false);
    };

    let Some(order) = queries::get_order_by_number(conn, channel_id, &reference)? else {
        return Ok(false);
    };

    // Guarded update: a concurrent pass or manual match may have claimed
    // the row; losing that race is not an error.
    Ok(queries::mark_transaction_auto_matched(conn, &txn.id, &order.id)?)
}

/// Explicit manual match override. Always lands on MANUAL_MATCHED and
/// stamps the actor; at least one target must be supplied.
pub fn manual_match(
    conn: &Connection,
    channel_id: &str,
    txn_id: &str,
    order_id: Option<&str>,
    payout_id: Option<&str>,
    matched_by: &str,
) -> Result<ProviderTransaction> {
    if order_id.is_none() && payout_id.is_none() {
        return Err(AppError::Validation(
            "A manual match requires an order_id or payout_id".into(),
        ));
    }

    queries::get_provider_transaction(conn, channel_id, txn_id)
        .or_not_found(msg::TRANSACTION_NOT_FOUND)?;

    if let Some(order_id) = order_id {
        let order = queries::get_order_by_id(conn, order_id).or_not_found(msg::ORDER_NOT_FOUND)?;
        if order.channel_id != channel_id {
            return Err(AppError::NotFound(msg::ORDER_NOT_FOUND.into()));
        }
    }
    if let Some(payout_id) = payout_id {
        let payout =
            queries::get_payout_by_id(conn, payout_id).or_not_found(msg::PAYOUT_NOT_FOUND)?;
        if payout.channel_id != channel_id {
            return Err(AppError::NotFound(msg::PAYOUT_NOT_FOUND.into()));
        }
    }

    let txn = queries::mark_transaction_manual_matched(conn, txn_id, order_id, payout_id, matched_by)
        .or_not_found(msg::TRANSACTION_NOT_FOUND)?;

    tracing::info!("Transaction {} manually matched by {}", txn.id, matched_by);
    Ok(txn)
}

/// Raise a discrepancy for an expected/actual difference.
///
/// `difference_cents = actual - expected` is derived here; severity comes
/// from the caller. When the discrepancy cites a transaction, that
/// transaction is flagged DISCREPANCY in the same transaction scope.
pub fn create_discrepancy(
    conn: &mut Connection,
    channel_id: &str,
    input: &CreateDiscrepancy,
) -> Result<ReconciliationDiscrepancy> {
    let tx = conn.transaction()?;

    if let Some(txn_id) = &input.provider_txn_id {
        queries::get_provider_transaction(&tx, channel_id, txn_id)
            .or_not_found(msg::TRANSACTION_NOT_FOUND)?;
        queries::mark_transaction_discrepancy(&tx, txn_id)?;
    }

    let discrepancy = queries::create_discrepancy(&tx, channel_id, input)?;
    tx.commit()?;

    tracing::info!(
        "Discrepancy raised on channel {}: {} ({} cents)",
        channel_id,
        discrepancy.discrepancy_type,
        discrepancy.difference_cents
    );
    Ok(discrepancy)
}

/// OPEN -> INVESTIGATING.
pub fn mark_investigating(
    conn: &Connection,
    channel_id: &str,
    discrepancy_id: &str,
) -> Result<ReconciliationDiscrepancy> {
    let existing = queries::get_discrepancy(conn, channel_id, discrepancy_id)
        .or_not_found(msg::DISCREPANCY_NOT_FOUND)?;

    queries::mark_discrepancy_investigating(conn, &existing.id)?.ok_or_else(|| {
        AppError::InvalidState(format!(
            "Discrepancy {} is {} and cannot move to investigating",
            existing.id,
            existing.status.as_ref()
        ))
    })
}

/// Terminal, audited resolution: records who resolved it and why.
/// `accepted` resolves to ACCEPTED (difference written off) instead of
/// RESOLVED (difference explained/corrected).
pub fn resolve(
    conn: &Connection,
    channel_id: &str,
    discrepancy_id: &str,
    resolved_by: &str,
    resolution: &str,
    accepted: bool,
) -> Result<ReconciliationDiscrepancy> {
    if resolution.trim().is_empty() {
        return Err(AppError::Validation("A resolution note is required".into()));
    }

    let existing = queries::get_discrepancy(conn, channel_id, discrepancy_id)
        .or_not_found(msg::DISCREPANCY_NOT_FOUND)?;

    let final_status = if accepted {
        crate::models::DiscrepancyStatus::Accepted
    } else {
        crate::models::DiscrepancyStatus::Resolved
    };

    let resolved =
        queries::resolve_discrepancy(conn, &existing.id, final_status, resolved_by, resolution)?
            .ok_or_else(|| {
                AppError::InvalidState(format!(
                    "Discrepancy {} is already {}",
                    existing.id,
                    existing.status.as_ref()
                ))
            })?;

    tracing::info!(
        "Discrepancy {} {} by {}",
        resolved.id,
        final_status.as_ref(),
        resolved_by
    );
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_reference_priority_order() {
        let data = serde_json::json!({
            "custom_id": "ORD-3",
            "invoice_id": "ORD-2",
            "reference_id": "ORD-1",
        });
        assert_eq!(extract_reference(Some(&data)), Some("ORD-1".to_string()));

        let data = serde_json::json!({ "custom_id": "ORD-3", "invoice_id": "ORD-2" });
        assert_eq!(extract_reference(Some(&data)), Some("ORD-2".to_string()));

        let data = serde_json::json!({ "custom_id": "ORD-3" });
        assert_eq!(extract_reference(Some(&data)), Some("ORD-3".to_string()));
    }

    #[test]
    fn test_extract_reference_handles_absence() {
        assert_eq!(extract_reference(None), None);
        assert_eq!(extract_reference(Some(&serde_json::json!({}))), None);
        // Blank and non-string values count as absent
        let data = serde_json::json!({ "reference_id": "  ", "invoice_id": 42 });
        assert_eq!(extract_reference(Some(&data)), None);
    }
}
