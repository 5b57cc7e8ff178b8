use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Risk classification derived from the additive score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a 0-100 score to its level at the documented thresholds.
    pub fn from_score(score: i64) -> Self {
        match score {
            s if s >= 80 => Self::Critical,
            s if s >= 60 => Self::High,
            s if s >= 40 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// One immutable fraud evaluation row. History is append-only: a row is
/// never updated after insert, and prior rows feed the historical-fraud
/// signal of later evaluations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudScore {
    pub id: String,
    pub channel_id: String,
    pub order_id: String,
    pub account_id: String,
    /// 0-100, sum of all triggered layers (capped at 100)
    pub risk_score: i64,
    pub risk_level: RiskLevel,
    /// Signal tags, e.g. "HIGH_VELOCITY" (each at most once)
    pub flags: Vec<String>,
    /// Human-readable explanations, in layer order
    pub reasons: Vec<String>,
    pub created_at: i64,
}

/// The outcome of one evaluation, returned to the caller alongside the
/// persisted score row.
#[derive(Debug, Clone, Serialize)]
pub struct FraudCheckResult {
    pub score_id: String,
    pub order_id: String,
    pub account_id: String,
    pub risk_score: i64,
    pub risk_level: RiskLevel,
    pub flags: Vec<String>,
    pub reasons: Vec<String>,
    /// Critical: auto-reject the order
    pub should_reject: bool,
    /// High: hold the order for manual review
    pub should_hold: bool,
    /// Medium: flag for review without holding
    pub should_flag: bool,
}

/// Per-order failure captured during a batch evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFraudError {
    pub order_id: String,
    pub error: String,
}

/// Aggregate outcome of a batch evaluation. One order's failure never
/// aborts the batch; it lands in `failed` instead.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFraudSummary {
    pub evaluated: Vec<FraudCheckResult>,
    pub failed: Vec<BatchFraudError>,
    pub low: i64,
    pub medium: i64,
    pub high: i64,
    pub critical: i64,
}

/// Filters for querying fraud score history.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FraudScoreFilters {
    pub order_id: Option<String>,
    pub account_id: Option<String>,
    pub risk_level: Option<RiskLevel>,
}
