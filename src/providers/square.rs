use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::EvidencePack;

use super::ProviderCase;

#[derive(Debug, Deserialize)]
struct SquareDisputeResponse {
    dispute: SquareDispute,
}

#[derive(Debug, Deserialize)]
struct SquareDispute {
    dispute_id: String,
    state: String,
    amount_money: Option<SquareMoney>,
    due_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SquareMoney {
    amount: i64,
    currency: String,
}

#[derive(Debug, Serialize)]
struct CreateEvidenceTextRequest {
    idempotency_key: String,
    evidence_type: &'static str,
    evidence_text: String,
}

/// Client for Square's disputes API.
#[derive(Debug, Clone)]
pub struct SquareClient {
    client: Client,
    access_token: String,
}

impl SquareClient {
    pub fn new(access_token: &str) -> Self {
        Self {
            client: Client::new(),
            access_token: access_token.to_string(),
        }
    }

    /// Fetch the current state of a dispute.
    pub async fn fetch_dispute(&self, dispute_id: &str) -> Result<ProviderCase> {
        let response = self
            .client
            .get(format!("https://connect.squareup.com/v2/disputes/{}", dispute_id))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Square API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!("Square API error: {}", error_text)));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse Square response: {}", e)))?;

        let parsed: SquareDisputeResponse = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::Provider(format!("Unexpected Square dispute shape: {}", e)))?;

        let due_at = parsed
            .dispute
            .due_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp());

        Ok(ProviderCase {
            provider_case_id: parsed.dispute.dispute_id,
            status: parsed.dispute.state,
            amount_cents: parsed.dispute.amount_money.as_ref().map(|m| m.amount),
            currency: parsed.dispute.amount_money.map(|m| m.currency),
            evidence_due_by: due_at,
            raw,
        })
    }

    /// Submit evidence against a dispute.
    ///
    /// Square takes evidence as separate uploads followed by an explicit
    /// submit call; we upload one consolidated text evidence then finalize.
    pub async fn submit_evidence(&self, dispute_id: &str, pack: &EvidencePack) -> Result<()> {
        let mut sections = Vec::new();
        if let Some(tracking) = &pack.tracking_number {
            sections.push(format!("Tracking number: {}", tracking));
        }
        if let Some(proof) = &pack.delivery_proof {
            sections.push(format!("Delivery: {}", proof));
        }
        if let Some(desc) = &pack.product_description {
            sections.push(format!("Products: {}", desc));
        }
        for c in &pack.customer_communication {
            sections.push(format!("[{}] {}", c.from, c.message));
        }
        sections.push(format!("Refund policy: {}", pack.refund_policy));

        let body = CreateEvidenceTextRequest {
            idempotency_key: pack.id.clone(),
            evidence_type: "GENERIC_EVIDENCE",
            evidence_text: sections.join("\n"),
        };

        let response = self
            .client
            .post(format!(
                "https://connect.squareup.com/v2/disputes/{}/evidence-text",
                dispute_id
            ))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Square API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "Square evidence upload failed: {}",
                error_text
            )));
        }

        let response = self
            .client
            .post(format!(
                "https://connect.squareup.com/v2/disputes/{}/submit-evidence",
                dispute_id
            ))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Square API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "Square evidence submission failed: {}",
                error_text
            )));
        }

        Ok(())
    }
}
