use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
    Failed,
}

/// Write-once lock plus cached result for an external event.
///
/// Unique on (channel_id, scope, idem_key). The scope namespaces keys per
/// event source, e.g. "webhook:stripe" or "ingest:square"; the key is the
/// provider's event/batch id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub channel_id: String,
    pub scope: String,
    pub idem_key: String,
    /// SHA-256 of the raw request body, for detecting payload drift on
    /// redelivery.
    pub request_hash: String,
    /// Cached response payload returned on duplicate delivery.
    pub result: Option<serde_json::Value>,
    pub status: IdempotencyStatus,
    pub created_at: i64,
    pub updated_at: i64,
}
