use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::providers::ProviderKind;

/// Matching state of an ingested provider transaction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchStatus {
    Unmatched,
    AutoMatched,
    ManualMatched,
    Discrepancy,
}

/// A provider-reported money movement (charge, refund, fee, payout line).
///
/// `(channel_id, provider, provider_txn_id)` is unique: re-ingesting the
/// same external id is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTransaction {
    pub id: String,
    pub channel_id: String,
    pub provider: ProviderKind,
    pub provider_txn_id: String,
    /// Provider's own type string: "charge", "refund", "chargeback", ...
    pub txn_type: String,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
    pub status: String,
    /// Opaque provider metadata. Reference extraction reads specific keys
    /// and must handle absence explicitly.
    pub provider_data: Option<serde_json::Value>,
    pub match_status: MatchStatus,
    pub matched_order_id: Option<String>,
    pub matched_payout_id: Option<String>,
    pub matched_at: Option<i64>,
    pub matched_by: Option<String>,
    pub provider_created_at: i64,
    pub created_at: i64,
}

/// One transaction in an ingestion batch, as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestTransaction {
    pub provider_txn_id: String,
    pub txn_type: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub fee_cents: i64,
    pub net_cents: i64,
    pub status: String,
    pub provider_data: Option<serde_json::Value>,
    pub provider_created_at: i64,
}

/// Outcome of one ingestion batch. Duplicates are counted, never errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub inserted: i64,
    pub duplicates: i64,
}

/// Outcome of an auto-match pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoMatchSummary {
    pub scanned: i64,
    pub matched: i64,
    /// Transactions left UNMATCHED for manual review (no resolvable
    /// reference, or reference did not correspond to an order)
    pub unmatched: i64,
}

/// Filters for querying provider transactions.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TransactionFilters {
    pub provider: Option<ProviderKind>,
    pub match_status: Option<MatchStatus>,
    pub txn_type: Option<String>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
}

/// One match-status bucket in the reconciliation stats rollup.
#[derive(Debug, Clone, Serialize)]
pub struct MatchStatusBucket {
    pub match_status: MatchStatus,
    pub count: i64,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
}
