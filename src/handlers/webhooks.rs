//! Inbound provider webhook endpoint.
//!
//! Deliveries are signature-verified against the channel's webhook secret,
//! then deduplicated through the idempotency ledger before any effect is
//! applied. The ledger claim, the dispute mutation and the cached result
//! all commit in one database transaction, so a redelivery - concurrent or
//! later - of the same event id is a guaranteed no-op.

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};

use crate::db::{queries, AppState};
use crate::disputes::{self, WebhookEvent};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path};
use crate::idempotency::{self, Begin};
use crate::providers::{self, ProviderKind};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/channels/{channel_id}/webhook/{provider}",
        post(handle_provider_webhook),
    )
}

#[derive(serde::Deserialize)]
struct WebhookPath {
    channel_id: String,
    provider: String,
}

/// POST /channels/{channel_id}/webhook/{provider}
pub async fn handle_provider_webhook(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path(path): Path<WebhookPath>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let provider: ProviderKind = path
        .provider
        .parse()
        .map_err(|_| AppError::Validation(format!("Unknown provider: {}", path.provider)))?;

    let mut conn = state.db.get()?;

    let channel =
        queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;
    if channel.provider != provider {
        return Err(AppError::Validation(format!(
            "Channel {} is not configured for provider {}",
            channel.id,
            provider.as_ref()
        )));
    }

    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("Missing x-webhook-signature header".into()))?;

    if !providers::verify_webhook_signature(&channel.webhook_secret, &body, signature)? {
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Invalid signature" })),
        ));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {}", e)))?;
    if event.event_id.is_empty() {
        return Err(AppError::Validation("event_id must not be empty".into()));
    }

    let scope = idempotency::webhook_scope(provider);
    let hash = idempotency::request_hash(&body);

    // Ledger claim and event effects commit together: a crash mid-apply
    // rolls back the claim too, keeping the provider's retry safe.
    let tx = conn.transaction()?;
    match idempotency::begin(&tx, &channel.id, &scope, &event.event_id, &hash)? {
        Begin::Duplicate(record) => {
            tracing::info!(
                "Webhook {} already processed for channel {}",
                event.event_id,
                channel.id
            );
            return Ok((
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "duplicate",
                    "result": record.result,
                })),
            ));
        }
        Begin::InProgress => {
            return Ok((
                StatusCode::OK,
                Json(serde_json::json!({ "status": "processing" })),
            ));
        }
        Begin::Fresh => {}
    }

    let outcome = disputes::apply_webhook_event(&tx, &channel.id, provider, &event)?;
    let summary = outcome.summary();
    idempotency::complete(&tx, &channel.id, &scope, &event.event_id, &summary)?;
    tx.commit()?;

    Ok((StatusCode::OK, Json(summary)))
}
