use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Severity is supplied by the caller/operator. The engine performs no
/// magnitude-to-severity inference.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscrepancySeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscrepancyStatus {
    Open,
    Investigating,
    Resolved,
    Accepted,
}

impl DiscrepancyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Accepted)
    }
}

/// An unexplained difference between what the provider reported and what
/// internal records expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationDiscrepancy {
    pub id: String,
    pub channel_id: String,
    /// Classification, e.g. "amount_mismatch", "missing_order",
    /// "settlement_count"
    pub discrepancy_type: String,
    pub severity: DiscrepancySeverity,
    pub description: String,
    pub provider_txn_id: Option<String>,
    pub order_id: Option<String>,
    pub expected_cents: i64,
    pub actual_cents: i64,
    /// actual - expected
    pub difference_cents: i64,
    pub status: DiscrepancyStatus,
    pub resolved_at: Option<i64>,
    pub resolved_by: Option<String>,
    pub resolution: Option<String>,
    pub created_at: i64,
}

/// Data required to raise a discrepancy. `difference_cents` is derived,
/// never supplied.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDiscrepancy {
    pub discrepancy_type: String,
    pub severity: DiscrepancySeverity,
    pub description: String,
    pub provider_txn_id: Option<String>,
    pub order_id: Option<String>,
    pub expected_cents: i64,
    pub actual_cents: i64,
}

/// Filters for querying discrepancies.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DiscrepancyFilters {
    pub status: Option<DiscrepancyStatus>,
    pub severity: Option<DiscrepancySeverity>,
    pub discrepancy_type: Option<String>,
}

/// One status bucket in the discrepancy stats rollup.
#[derive(Debug, Clone, Serialize)]
pub struct DiscrepancyStatusBucket {
    pub status: DiscrepancyStatus,
    pub count: i64,
    /// Sum of absolute differences, for "money at risk" display
    pub abs_difference_cents: i64,
}

/// Combined reconciliation statistics for the ops console.
#[derive(Debug, Clone, Serialize)]
pub struct ReconStats {
    pub transactions: Vec<crate::models::MatchStatusBucket>,
    pub discrepancies: Vec<DiscrepancyStatusBucket>,
}
