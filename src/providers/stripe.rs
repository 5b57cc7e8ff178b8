use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::EvidencePack;

use super::ProviderCase;

#[derive(Debug, Deserialize)]
struct StripeDispute {
    id: String,
    status: String,
    amount: Option<i64>,
    currency: Option<String>,
    evidence_details: Option<StripeEvidenceDetails>,
}

#[derive(Debug, Deserialize)]
struct StripeEvidenceDetails {
    due_by: Option<i64>,
}

/// Client for Stripe's disputes API.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.to_string(),
        }
    }

    /// Fetch the current state of a dispute (`dp_...`).
    pub async fn fetch_dispute(&self, dispute_id: &str) -> Result<ProviderCase> {
        let response = self
            .client
            .get(format!("https://api.stripe.com/v1/disputes/{}", dispute_id))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!("Stripe API error: {}", error_text)));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse Stripe response: {}", e)))?;

        let dispute: StripeDispute = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::Provider(format!("Unexpected Stripe dispute shape: {}", e)))?;

        Ok(ProviderCase {
            provider_case_id: dispute.id,
            status: dispute.status,
            amount_cents: dispute.amount,
            currency: dispute.currency,
            evidence_due_by: dispute.evidence_details.and_then(|d| d.due_by),
            raw,
        })
    }

    /// Submit evidence against a dispute.
    ///
    /// Stripe takes evidence as form fields on the dispute itself
    /// (`POST /v1/disputes/{id}` with `evidence[...]` keys) and `submit=true`
    /// to finalize in one call.
    pub async fn submit_evidence(&self, dispute_id: &str, pack: &EvidencePack) -> Result<()> {
        let mut form: Vec<(String, String)> = vec![("submit".into(), "true".into())];

        if let Some(tracking) = &pack.tracking_number {
            form.push(("evidence[shipping_tracking_number]".into(), tracking.clone()));
        }
        if let Some(proof) = &pack.delivery_proof {
            form.push(("evidence[shipping_documentation]".into(), proof.clone()));
        }
        if let Some(desc) = &pack.product_description {
            form.push(("evidence[product_description]".into(), desc.clone()));
        }
        if !pack.customer_communication.is_empty() {
            let joined = pack
                .customer_communication
                .iter()
                .map(|c| format!("[{}] {}", c.from, c.message))
                .collect::<Vec<_>>()
                .join("\n");
            form.push(("evidence[customer_communication]".into(), joined));
        }
        form.push(("evidence[refund_policy_disclosure]".into(), pack.refund_policy.clone()));

        let response = self
            .client
            .post(format!("https://api.stripe.com/v1/disputes/{}", dispute_id))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "Stripe evidence submission failed: {}",
                error_text
            )));
        }

        Ok(())
    }
}
