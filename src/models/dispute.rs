use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::providers::ProviderKind;

/// Primary dispute lifecycle state.
///
/// Forward path: Open -> EvidenceRequired -> EvidenceBuilding ->
/// EvidenceReady -> Submitted -> Won/Lost -> Closed. Duplicate and
/// Canceled are side-exits reachable from any open state. The
/// needs-manual escalation is a flag layered on top of the primary
/// status, not a status of its own.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    EvidenceRequired,
    EvidenceBuilding,
    EvidenceReady,
    Submitted,
    Won,
    Lost,
    Closed,
    Duplicate,
    Canceled,
}

impl DisputeStatus {
    /// Terminal states: no further primary-lifecycle transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Duplicate | Self::Canceled)
    }

    /// Won/Lost carry a provider verdict but may still move to Closed.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Won | Self::Lost) || self.is_terminal()
    }

    /// "Open" in the lifecycle sense: evidence work is still possible.
    pub fn is_open(&self) -> bool {
        !self.is_resolved()
    }
}

/// A chargeback/claim raised by the payment provider.
/// Owned exclusively by the dispute state machine; mutated only through
/// defined transitions, each of which journals one timeline entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: String,
    pub channel_id: String,
    pub provider: ProviderKind,
    /// Provider's case ID (e.g. Stripe `dp_...`). Unique per provider.
    pub provider_case_id: String,
    /// Internal order, once matched. None until the order reference in the
    /// provider payload resolves.
    pub order_id: Option<String>,
    pub status: DisputeStatus,
    pub reason: String,
    pub amount_cents: i64,
    pub currency: String,
    pub evidence_pack_id: Option<String>,
    /// Provider deadline for evidence submission (Unix seconds).
    pub evidence_deadline: Option<i64>,
    /// Escalation flag: an operator must look at this dispute.
    pub needs_manual: bool,
    /// Last submission/sync failure, for the ops console.
    pub last_error: Option<String>,
    pub last_provider_update_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Data required to open a dispute from a provider webhook.
#[derive(Debug, Clone)]
pub struct CreateDispute {
    pub channel_id: String,
    pub provider: ProviderKind,
    pub provider_case_id: String,
    pub order_id: Option<String>,
    pub reason: String,
    pub amount_cents: i64,
    pub currency: String,
    pub evidence_deadline: Option<i64>,
}

/// Timeline entry kinds. Each transition appends exactly one entry whose
/// kind names the transition performed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TimelineKind {
    Sync,
    EvidenceBuilding,
    EvidenceSubmitted,
    NeedsManual,
    StatusUpdate,
    Webhook,
}

/// Append-only audit journal of a dispute. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeTimelineEntry {
    pub id: String,
    pub dispute_id: String,
    pub kind: TimelineKind,
    pub message: String,
    /// Opaque structured payload (provider snapshots, actor info, ...)
    pub meta: Option<serde_json::Value>,
    pub created_at: i64,
}

/// Filters for querying disputes.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DisputeFilters {
    pub status: Option<DisputeStatus>,
    pub provider: Option<ProviderKind>,
    pub needs_manual: Option<bool>,
}

/// One status bucket in the dispute stats rollup.
#[derive(Debug, Clone, Serialize)]
pub struct DisputeStatusBucket {
    pub status: DisputeStatus,
    pub count: i64,
    pub amount_cents: i64,
}

/// Grouped counts/amounts for the ops console.
#[derive(Debug, Clone, Serialize)]
pub struct DisputeStats {
    pub by_status: Vec<DisputeStatusBucket>,
    pub needs_manual_count: i64,
    pub total_count: i64,
    pub total_amount_cents: i64,
}
