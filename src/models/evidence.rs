use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Evidence pack lifecycle, strictly nested inside the owning dispute's
/// lifecycle: BUILDING while the pack is assembled and enriched, READY
/// once an operator signs it off, SUBMITTED after the provider accepted it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvidencePackStatus {
    Building,
    Ready,
    Submitted,
}

/// One message exchanged with the customer, cited as evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationEntry {
    /// "merchant" or "customer"
    pub from: String,
    pub message: String,
    pub sent_at: i64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttachmentKind {
    Photo,
    Invoice,
    Other,
}

/// A file attached to the pack (stored elsewhere; we keep the pointer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub name: String,
    pub url: String,
}

/// The structured bundle of proof submitted to contest a dispute.
/// 1:1 with its dispute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePack {
    pub id: String,
    pub dispute_id: String,
    pub status: EvidencePackStatus,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    /// "{carrier}, delivered {timestamp}" once the shipment confirms delivery
    pub delivery_proof: Option<String>,
    pub product_description: Option<String>,
    /// Ordered list, populated by operators after the initial build
    pub customer_communication: Vec<CommunicationEntry>,
    pub refund_policy: String,
    pub terms_of_service: String,
    pub attachments: Vec<Attachment>,
    pub submitted_at: Option<i64>,
    pub submitted_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl EvidencePack {
    pub fn has_tracking(&self) -> bool {
        self.tracking_number.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn has_delivery_confirmation(&self) -> bool {
        self.delivery_proof.is_some()
    }

    pub fn has_attachment(&self, kind: AttachmentKind) -> bool {
        self.attachments.iter().any(|a| a.kind == kind)
    }
}

/// Operator enrichment of a BUILDING pack. All fields optional; lists are
/// appended, text fields overwrite.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UpdateEvidencePack {
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub delivery_proof: Option<String>,
    pub product_description: Option<String>,
    pub refund_policy: Option<String>,
    pub terms_of_service: Option<String>,
    #[serde(default)]
    pub add_communication: Vec<CommunicationEntry>,
    #[serde(default)]
    pub add_attachments: Vec<Attachment>,
}

/// Advisory response recommendation. Never transitions the dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecommendedAction {
    Challenge,
    PartialRefund,
    Accept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecommendationConfidence {
    High,
    Medium,
    Low,
}

/// Outcome of the evidence strength scoring.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRecommendation {
    pub strength: i64,
    pub action: RecommendedAction,
    pub confidence: RecommendationConfidence,
    pub reasons: Vec<String>,
}
