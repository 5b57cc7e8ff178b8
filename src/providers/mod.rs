mod square;
mod stripe;

pub use square::SquareClient;
pub use stripe::StripeClient;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use strum::{AsRefStr, EnumString};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::models::{Channel, EvidencePack};

type HmacSha256 = Hmac<Sha256>;

/// Payment providers a channel can settle through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderKind {
    Stripe,
    Square,
}

/// Provider-agnostic snapshot of a dispute case, as returned by case sync.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderCase {
    pub provider_case_id: String,
    /// Provider-native status string ("needs_response", "won", ...)
    pub status: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub evidence_due_by: Option<i64>,
    /// Full provider payload for the timeline journal
    pub raw: serde_json::Value,
}

/// Terminal verdicts a provider snapshot or webhook can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseVerdict {
    Won,
    Lost,
}

impl ProviderCase {
    /// Map the provider-native status to a terminal verdict, if any.
    /// Stripe reports "won"/"lost"; Square reports "WON"/"LOST".
    pub fn verdict(&self) -> Option<CaseVerdict> {
        match self.status.to_ascii_lowercase().as_str() {
            "won" => Some(CaseVerdict::Won),
            "lost" | "charge_refunded" => Some(CaseVerdict::Lost),
            _ => None,
        }
    }
}

/// Outbound dispute gateway for a channel's provider.
///
/// One variant per provider; `for_channel` picks the right client from the
/// channel's configuration. Calls are single outbound requests: timeouts
/// and retries are the caller's concern, and a failed call never modifies
/// local state.
pub enum Gateway {
    Stripe(StripeClient),
    Square(SquareClient),
}

impl Gateway {
    pub fn for_channel(channel: &Channel) -> Self {
        match channel.provider {
            ProviderKind::Stripe => Gateway::Stripe(StripeClient::new(&channel.provider_api_key)),
            ProviderKind::Square => Gateway::Square(SquareClient::new(&channel.provider_api_key)),
        }
    }

    /// Fetch the provider's current view of a dispute case.
    pub async fn fetch_case(&self, provider_case_id: &str) -> Result<ProviderCase> {
        match self {
            Gateway::Stripe(c) => c.fetch_dispute(provider_case_id).await,
            Gateway::Square(c) => c.fetch_dispute(provider_case_id).await,
        }
    }

    /// Submit an evidence pack against a dispute case.
    pub async fn submit_evidence(&self, provider_case_id: &str, pack: &EvidencePack) -> Result<()> {
        match self {
            Gateway::Stripe(c) => c.submit_evidence(provider_case_id, pack).await,
            Gateway::Square(c) => c.submit_evidence(provider_case_id, pack).await,
        }
    }
}

/// Maximum age of a webhook timestamp before it's rejected (in seconds).
const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Verify an inbound webhook signature.
///
/// All provider deliveries arrive through the platform's webhook relay,
/// which signs with the channel's secret in the
/// `t=<timestamp>,v1=<hex hmac-sha256>` format over `"{t}.{body}"`.
pub fn verify_webhook_signature(secret: &str, payload: &[u8], signature: &str) -> Result<bool> {
    let mut timestamp = None;
    let mut sig_v1 = None;

    for part in signature.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            sig_v1 = Some(s);
        }
    }

    let timestamp_str =
        timestamp.ok_or_else(|| AppError::Validation("Invalid signature format".into()))?;
    let sig_v1 =
        sig_v1.ok_or_else(|| AppError::Validation("Invalid signature format".into()))?;

    // Reject stale timestamps to prevent replay of captured deliveries.
    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| AppError::Validation("Invalid timestamp in signature".into()))?;

    let now = chrono::Utc::now().timestamp();
    let age = now - timestamp;

    if age > WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(
            "Webhook rejected: timestamp too old (age={}s, max={}s)",
            age,
            WEBHOOK_TIMESTAMP_TOLERANCE_SECS
        );
        return Ok(false);
    }

    // Clock skew tolerance: 60 seconds
    if age < -60 {
        tracing::warn!("Webhook rejected: timestamp in the future (age={}s)", age);
        return Ok(false);
    }

    let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison; signature length is not secret (always 64
    // hex chars for SHA-256) so the length check may short-circuit.
    let expected_bytes = expected.as_bytes();
    let provided_bytes = sig_v1.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}
