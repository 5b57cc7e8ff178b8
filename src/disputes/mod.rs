//! Dispute state machine.
//!
//! Owns the dispute lifecycle. Every mutation here runs inside a database
//! transaction, performs its status change with a status-guarded UPDATE
//! (so concurrent operators racing on the same dispute fail with
//! `InvalidState` instead of silently overwriting each other), and appends
//! exactly one timeline entry naming the transition. The timeline is the
//! audit-of-record: append-only, never mutated.

pub mod evidence;

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{msg, AppError, OptionExt, Result};
use crate::models::{
    CreateDispute, Dispute, DisputeStatus, EvidencePack, EvidencePackStatus, TimelineKind,
    UpdateEvidencePack,
};
use crate::providers::{CaseVerdict, ProviderCase, ProviderKind};

/// States in which evidence work is still possible.
const OPEN_STATES: &[DisputeStatus] = &[
    DisputeStatus::Open,
    DisputeStatus::EvidenceRequired,
    DisputeStatus::EvidenceBuilding,
    DisputeStatus::EvidenceReady,
    DisputeStatus::Submitted,
];

/// A provider webhook delivery, already signature-verified and
/// ledger-deduplicated by the caller.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource: serde_json::Value,
}

/// What applying a webhook event did.
#[derive(Debug)]
pub enum WebhookOutcome {
    Created(Dispute),
    Updated(Dispute),
    Resolved(Dispute),
    /// A dispute for this (provider, case) already existed; nothing changed.
    ExistingCase(Dispute),
    /// Event type is not dispute-related; out of scope for this engine.
    Ignored,
}

impl WebhookOutcome {
    /// Compact JSON summary cached in the idempotency ledger and returned
    /// to the provider.
    pub fn summary(&self) -> serde_json::Value {
        match self {
            Self::Created(d) => serde_json::json!({ "outcome": "created", "dispute_id": d.id }),
            Self::Updated(d) => serde_json::json!({ "outcome": "updated", "dispute_id": d.id }),
            Self::Resolved(d) => serde_json::json!({ "outcome": "resolved", "dispute_id": d.id }),
            Self::ExistingCase(d) => {
                serde_json::json!({ "outcome": "existing_case", "dispute_id": d.id })
            }
            Self::Ignored => serde_json::json!({ "outcome": "ignored" }),
        }
    }
}

/// Read a required string field from the opaque resource payload.
fn require_str(resource: &serde_json::Value, field: &str) -> Result<String> {
    resource
        .get(field)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| AppError::Validation(format!("resource.{} is missing", field)))
}

/// Apply a dispute-related webhook event. Runs inside the caller's
/// transaction (the webhook handler wraps ledger claim + effects in one).
pub fn apply_webhook_event(
    conn: &Connection,
    channel_id: &str,
    provider: ProviderKind,
    event: &WebhookEvent,
) -> Result<WebhookOutcome> {
    match event.event_type.as_str() {
        "dispute.created" => apply_case_created(conn, channel_id, provider, event),
        "dispute.evidence_required" => apply_evidence_required(conn, provider, event),
        "dispute.updated" | "dispute.closed" => apply_case_update(conn, provider, event),
        _ => {
            tracing::debug!("Ignoring non-dispute event type {}", event.event_type);
            Ok(WebhookOutcome::Ignored)
        }
    }
}

fn apply_case_created(
    conn: &Connection,
    channel_id: &str,
    provider: ProviderKind,
    event: &WebhookEvent,
) -> Result<WebhookOutcome> {
    let resource = &event.resource;
    let provider_case_id = require_str(resource, "id")?;
    let amount_cents = resource
        .get("amount_cents")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| AppError::Validation("resource.amount_cents is missing".into()))?;
    let currency = require_str(resource, "currency")?;
    let reason = resource
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("unspecified")
        .to_string();
    let evidence_deadline = resource.get("evidence_due_by").and_then(|v| v.as_i64());

    // Order reference is optional in the provider payload; absence leaves
    // the dispute unmatched for the operator to link manually.
    let order_id = match resource.get("order_number").and_then(|v| v.as_str()) {
        Some(number) => queries::get_order_by_number(conn, channel_id, number)?.map(|o| o.id),
        None => None,
    };

    let created = queries::try_create_dispute(
        conn,
        &CreateDispute {
            channel_id: channel_id.to_string(),
            provider,
            provider_case_id: provider_case_id.clone(),
            order_id,
            reason,
            amount_cents,
            currency,
            evidence_deadline,
        },
    )?;

    match created {
        Some(dispute) => {
            queries::append_timeline(
                conn,
                &dispute.id,
                TimelineKind::Webhook,
                "Dispute opened by provider",
                Some(&serde_json::json!({
                    "event_id": event.event_id,
                    "resource": resource,
                })),
            )?;
            tracing::info!(
                "Dispute created from webhook: case={} dispute={}",
                provider_case_id,
                dispute.id
            );
            Ok(WebhookOutcome::Created(dispute))
        }
        None => {
            // The unique (provider, case) index is the backstop when the
            // same case arrives under a fresh event id.
            let existing = queries::get_dispute_by_case(conn, provider, &provider_case_id)
                .or_not_found(msg::DISPUTE_NOT_FOUND)?;
            tracing::info!(
                "Duplicate dispute.created for case {} ignored (dispute {})",
                provider_case_id,
                existing.id
            );
            Ok(WebhookOutcome::ExistingCase(existing))
        }
    }
}

fn apply_evidence_required(
    conn: &Connection,
    provider: ProviderKind,
    event: &WebhookEvent,
) -> Result<WebhookOutcome> {
    let provider_case_id = require_str(&event.resource, "id")?;
    // Unknown case: acknowledge and move on, a 4xx would only make the
    // provider redeliver an event we can never apply.
    let Some(dispute) = queries::get_dispute_by_case(conn, provider, &provider_case_id)? else {
        tracing::warn!("Evidence-required event for unknown case {}", provider_case_id);
        return Ok(WebhookOutcome::Ignored);
    };

    let deadline = event.resource.get("evidence_due_by").and_then(|v| v.as_i64());
    queries::set_dispute_deadline(conn, &dispute.id, deadline)?;

    let meta = serde_json::json!({ "event_id": event.event_id, "resource": event.resource });
    let updated = match queries::transition_dispute_status(
        conn,
        &dispute.id,
        &[DisputeStatus::Open],
        DisputeStatus::EvidenceRequired,
    )? {
        Some(updated) => {
            queries::append_timeline(
                conn,
                &updated.id,
                TimelineKind::Webhook,
                "Provider requested evidence",
                Some(&meta),
            )?;
            updated
        }
        None => {
            // Already past Open; record the provider's nudge without
            // disturbing evidence workflow state.
            queries::append_timeline(
                conn,
                &dispute.id,
                TimelineKind::Webhook,
                "Provider evidence reminder",
                Some(&meta),
            )?;
            queries::get_dispute_by_id(conn, &dispute.id).or_not_found(msg::DISPUTE_NOT_FOUND)?
        }
    };

    Ok(WebhookOutcome::Updated(updated))
}

fn apply_case_update(
    conn: &Connection,
    provider: ProviderKind,
    event: &WebhookEvent,
) -> Result<WebhookOutcome> {
    let provider_case_id = require_str(&event.resource, "id")?;
    let Some(dispute) = queries::get_dispute_by_case(conn, provider, &provider_case_id)? else {
        tracing::warn!("Case update for unknown case {}", provider_case_id);
        return Ok(WebhookOutcome::Ignored);
    };

    queries::set_dispute_provider_update(conn, &dispute.id, chrono::Utc::now().timestamp())?;

    let provider_status = event
        .resource
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let verdict = match provider_status.to_ascii_lowercase().as_str() {
        "won" => Some(CaseVerdict::Won),
        "lost" | "charge_refunded" => Some(CaseVerdict::Lost),
        _ => None,
    };

    let meta = serde_json::json!({
        "event_id": event.event_id,
        "resource": event.resource,
        "source": "webhook",
    });

    // A provider verdict resolves a SUBMITTED dispute; in any other local
    // state the snapshot is journaled and resolution stays an explicit
    // operator action.
    if let Some(verdict) = verdict {
        let to = match verdict {
            CaseVerdict::Won => DisputeStatus::Won,
            CaseVerdict::Lost => DisputeStatus::Lost,
        };
        if let Some(resolved) =
            queries::transition_dispute_status(conn, &dispute.id, &[DisputeStatus::Submitted], to)?
        {
            queries::append_timeline(
                conn,
                &resolved.id,
                TimelineKind::StatusUpdate,
                &format!("Dispute {} per provider verdict", to.as_ref()),
                Some(&meta),
            )?;
            tracing::info!("Dispute {} resolved {} by webhook", resolved.id, to.as_ref());
            return Ok(WebhookOutcome::Resolved(resolved));
        }
    }

    queries::append_timeline(
        conn,
        &dispute.id,
        TimelineKind::Webhook,
        &format!("Provider case update ({})", event.event_type),
        Some(&meta),
    )?;
    let refreshed =
        queries::get_dispute_by_id(conn, &dispute.id).or_not_found(msg::DISPUTE_NOT_FOUND)?;
    Ok(WebhookOutcome::Updated(refreshed))
}

/// Channel-scoped dispute lookup shared by the operator surface.
fn load_dispute(conn: &Connection, channel_id: &str, dispute_id: &str) -> Result<Dispute> {
    queries::get_dispute(conn, channel_id, dispute_id).or_not_found(msg::DISPUTE_NOT_FOUND)
}

/// Build the evidence pack for a dispute.
///
/// Requires status in {OPEN, EVIDENCE_REQUIRED} and a linked order.
/// Creates the pack in BUILDING from order/shipment facts, links it, and
/// moves the dispute to EVIDENCE_BUILDING.
pub fn build_evidence(
    conn: &mut Connection,
    channel_id: &str,
    dispute_id: &str,
) -> Result<(Dispute, EvidencePack)> {
    let tx = conn.transaction()?;

    let dispute = load_dispute(&tx, channel_id, dispute_id)?;

    if dispute.evidence_pack_id.is_some() {
        return Err(AppError::InvalidState(format!(
            "Dispute {} already has an evidence pack",
            dispute.id
        )));
    }

    let Some(order_id) = dispute.order_id.clone() else {
        return Err(AppError::Validation(format!(
            "Dispute {} has no linked order to build evidence from",
            dispute.id
        )));
    };

    let updated = queries::transition_dispute_status(
        &tx,
        &dispute.id,
        &[DisputeStatus::Open, DisputeStatus::EvidenceRequired],
        DisputeStatus::EvidenceBuilding,
    )?
    .ok_or_else(|| {
        AppError::InvalidState(format!(
            "Cannot build evidence for dispute {} in status {}",
            dispute.id,
            dispute.status.as_ref()
        ))
    })?;

    let order = queries::get_order_by_id(&tx, &order_id).or_not_found(msg::ORDER_NOT_FOUND)?;
    let shipment = queries::get_latest_shipment(&tx, &order.id)?;
    let facts = evidence::synthesize(&tx, &order, shipment.as_ref())?;

    let pack = queries::create_evidence_pack(
        &tx,
        &queries::CreateEvidencePack {
            dispute_id: &dispute.id,
            tracking_number: facts.tracking_number,
            tracking_url: facts.tracking_url,
            delivery_proof: facts.delivery_proof,
            product_description: facts.product_description,
            refund_policy: evidence::REFUND_POLICY_TEXT.to_string(),
            terms_of_service: evidence::TERMS_OF_SERVICE_TEXT.to_string(),
        },
    )?;
    queries::link_evidence_pack(&tx, &dispute.id, &pack.id)?;

    queries::append_timeline(
        &tx,
        &dispute.id,
        TimelineKind::EvidenceBuilding,
        "Evidence pack created from order and shipment data",
        Some(&serde_json::json!({
            "evidence_pack_id": pack.id,
            "order_id": order.id,
            "shipment_id": shipment.as_ref().map(|s| s.id.clone()),
        })),
    )?;

    tx.commit()?;

    let dispute = Dispute {
        evidence_pack_id: Some(pack.id.clone()),
        ..updated
    };
    Ok((dispute, pack))
}

/// Operator enrichment of a BUILDING pack: append communication and
/// attachments, override text fields.
pub fn update_evidence(
    conn: &mut Connection,
    channel_id: &str,
    dispute_id: &str,
    input: &UpdateEvidencePack,
) -> Result<EvidencePack> {
    let tx = conn.transaction()?;

    let dispute = load_dispute(&tx, channel_id, dispute_id)?;
    let mut pack = queries::get_evidence_pack_by_dispute(&tx, &dispute.id)
        .or_not_found(msg::EVIDENCE_NOT_FOUND)?;

    if pack.status != EvidencePackStatus::Building {
        return Err(AppError::InvalidState(format!(
            "Evidence pack {} is {}, not building",
            pack.id,
            pack.status.as_ref()
        )));
    }

    if let Some(v) = &input.tracking_number {
        pack.tracking_number = Some(v.clone());
    }
    if let Some(v) = &input.tracking_url {
        pack.tracking_url = Some(v.clone());
    }
    if let Some(v) = &input.delivery_proof {
        pack.delivery_proof = Some(v.clone());
    }
    if let Some(v) = &input.product_description {
        pack.product_description = Some(v.clone());
    }
    if let Some(v) = &input.refund_policy {
        pack.refund_policy = v.clone();
    }
    if let Some(v) = &input.terms_of_service {
        pack.terms_of_service = v.clone();
    }
    pack.customer_communication
        .extend(input.add_communication.iter().cloned());
    pack.attachments.extend(input.add_attachments.iter().cloned());

    queries::save_evidence_pack(&tx, &pack)?;
    tx.commit()?;

    Ok(pack)
}

/// Sign off the pack: BUILDING -> READY, dispute -> EVIDENCE_READY.
pub fn mark_evidence_ready(
    conn: &mut Connection,
    channel_id: &str,
    dispute_id: &str,
    actor: &str,
) -> Result<(Dispute, EvidencePack)> {
    let tx = conn.transaction()?;

    let dispute = load_dispute(&tx, channel_id, dispute_id)?;
    let pack = queries::get_evidence_pack_by_dispute(&tx, &dispute.id)
        .or_not_found(msg::EVIDENCE_NOT_FOUND)?;

    let pack = queries::transition_evidence_pack(
        &tx,
        &pack.id,
        EvidencePackStatus::Building,
        EvidencePackStatus::Ready,
    )?
    .ok_or_else(|| {
        AppError::InvalidState(format!("Evidence pack {} is not in building state", pack.id))
    })?;

    let dispute = queries::transition_dispute_status(
        &tx,
        &dispute.id,
        &[DisputeStatus::EvidenceBuilding],
        DisputeStatus::EvidenceReady,
    )?
    .ok_or_else(|| {
        AppError::InvalidState(format!(
            "Cannot mark evidence ready for dispute {} in status {}",
            dispute.id,
            dispute.status.as_ref()
        ))
    })?;

    queries::append_timeline(
        &tx,
        &dispute.id,
        TimelineKind::StatusUpdate,
        "Evidence pack marked ready",
        Some(&serde_json::json!({ "actor": actor, "evidence_pack_id": pack.id })),
    )?;

    tx.commit()?;
    Ok((dispute, pack))
}

/// Read-only precheck before the outbound submission call: the dispute's
/// pack must be READY, otherwise `EvidenceNotReady`.
pub fn ensure_submittable(
    conn: &Connection,
    channel_id: &str,
    dispute_id: &str,
) -> Result<(Dispute, EvidencePack)> {
    let dispute = load_dispute(conn, channel_id, dispute_id)?;
    let pack = queries::get_evidence_pack_by_dispute(conn, &dispute.id)
        .or_not_found(msg::EVIDENCE_NOT_FOUND)?;

    if pack.status != EvidencePackStatus::Ready {
        return Err(AppError::EvidenceNotReady(format!(
            "Evidence pack {} is {}, not ready",
            pack.id,
            pack.status.as_ref()
        )));
    }

    Ok((dispute, pack))
}

/// Record a successful provider submission: pack READY -> SUBMITTED
/// (stamped with submitter and timestamp), dispute -> SUBMITTED.
///
/// Called only after the outbound call succeeded; a provider failure
/// leaves local state untouched so the submission is safely retryable.
pub fn apply_evidence_submitted(
    conn: &mut Connection,
    channel_id: &str,
    dispute_id: &str,
    submitted_by: &str,
    meta: Option<serde_json::Value>,
) -> Result<(Dispute, EvidencePack)> {
    let tx = conn.transaction()?;

    let (dispute, pack) = ensure_submittable(&tx, channel_id, dispute_id)?;

    let pack = queries::mark_evidence_pack_submitted(&tx, &pack.id, submitted_by)?
        .ok_or_else(|| {
            AppError::EvidenceNotReady(format!("Evidence pack {} is not ready", pack.id))
        })?;

    let dispute = queries::transition_dispute_status(
        &tx,
        &dispute.id,
        &[DisputeStatus::EvidenceReady],
        DisputeStatus::Submitted,
    )?
    .ok_or_else(|| {
        AppError::InvalidState(format!(
            "Cannot submit dispute {} in status {}",
            dispute.id,
            dispute.status.as_ref()
        ))
    })?;

    queries::set_dispute_last_error(&tx, &dispute.id, None)?;

    let mut entry_meta = serde_json::json!({ "submitted_by": submitted_by });
    if let Some(extra) = meta {
        entry_meta["request"] = extra;
    }
    queries::append_timeline(
        &tx,
        &dispute.id,
        TimelineKind::EvidenceSubmitted,
        "Evidence submitted to provider",
        Some(&entry_meta),
    )?;

    tx.commit()?;

    tracing::info!(
        "Evidence submitted: dispute={} pack={} by={}",
        dispute.id,
        pack.id,
        submitted_by
    );
    Ok((dispute, pack))
}

/// Escalate for manual handling. A side-flag on top of the primary status;
/// forward progress of the lifecycle is unaffected.
pub fn mark_needs_manual(
    conn: &mut Connection,
    channel_id: &str,
    dispute_id: &str,
    reason: &str,
    actor: &str,
    request_meta: Option<serde_json::Value>,
) -> Result<Dispute> {
    let tx = conn.transaction()?;

    let dispute = load_dispute(&tx, channel_id, dispute_id)?;
    let dispute = queries::set_dispute_needs_manual(&tx, &dispute.id)?.ok_or_else(|| {
        AppError::InvalidState(format!(
            "Dispute {} is {} and cannot be escalated",
            dispute.id,
            dispute.status.as_ref()
        ))
    })?;

    let mut meta = serde_json::json!({ "reason": reason, "actor": actor });
    if let Some(extra) = request_meta {
        meta["request"] = extra;
    }
    queries::append_timeline(
        &tx,
        &dispute.id,
        TimelineKind::NeedsManual,
        &format!("Escalated for manual handling: {}", reason),
        Some(&meta),
    )?;

    tx.commit()?;
    Ok(dispute)
}

/// Operator status resolution.
///
/// SUBMITTED resolves to WON/LOST/CLOSED (the only terminal path for the
/// primary lifecycle); WON/LOST may settle to CLOSED; any open state may
/// exit sideways to DUPLICATE or CANCELED. Everything else is an illegal
/// jump.
pub fn update_status(
    conn: &mut Connection,
    channel_id: &str,
    dispute_id: &str,
    new_status: DisputeStatus,
    actor: &str,
    request_meta: Option<serde_json::Value>,
) -> Result<Dispute> {
    let from: &[DisputeStatus] = match new_status {
        DisputeStatus::Won | DisputeStatus::Lost => &[DisputeStatus::Submitted],
        DisputeStatus::Closed => &[
            DisputeStatus::Submitted,
            DisputeStatus::Won,
            DisputeStatus::Lost,
        ],
        DisputeStatus::Duplicate | DisputeStatus::Canceled => OPEN_STATES,
        _ => {
            return Err(AppError::Validation(format!(
                "Status {} cannot be set directly",
                new_status.as_ref()
            )))
        }
    };

    let tx = conn.transaction()?;

    let dispute = load_dispute(&tx, channel_id, dispute_id)?;
    let updated = queries::transition_dispute_status(&tx, &dispute.id, from, new_status)?
        .ok_or_else(|| {
            AppError::InvalidState(format!(
                "Cannot move dispute {} from {} to {}",
                dispute.id,
                dispute.status.as_ref(),
                new_status.as_ref()
            ))
        })?;

    let mut meta = serde_json::json!({
        "actor": actor,
        "from": dispute.status.as_ref(),
        "to": new_status.as_ref(),
    });
    if let Some(extra) = request_meta {
        meta["request"] = extra;
    }
    queries::append_timeline(
        &tx,
        &updated.id,
        TimelineKind::StatusUpdate,
        &format!("Status changed to {}", new_status.as_ref()),
        Some(&meta),
    )?;

    tx.commit()?;

    tracing::info!(
        "Dispute {} status {} -> {} by {}",
        updated.id,
        dispute.status.as_ref(),
        new_status.as_ref(),
        actor
    );
    Ok(updated)
}

/// Record a provider case snapshot from `syncCase`.
///
/// Refreshes `last_provider_update_at` (and the evidence deadline when the
/// provider reports one) and journals the snapshot. Never changes the
/// local authoritative status: status changes are explicit operator or
/// webhook actions.
pub fn record_sync(
    conn: &mut Connection,
    channel_id: &str,
    dispute_id: &str,
    case: &ProviderCase,
) -> Result<Dispute> {
    let tx = conn.transaction()?;

    let dispute = load_dispute(&tx, channel_id, dispute_id)?;
    queries::set_dispute_provider_update(&tx, &dispute.id, chrono::Utc::now().timestamp())?;
    queries::set_dispute_deadline(&tx, &dispute.id, case.evidence_due_by)?;
    queries::set_dispute_last_error(&tx, &dispute.id, None)?;

    queries::append_timeline(
        &tx,
        &dispute.id,
        TimelineKind::Sync,
        &format!("Provider case synced (provider status: {})", case.status),
        Some(&serde_json::json!({ "case": case.raw })),
    )?;

    let refreshed =
        queries::get_dispute_by_id(&tx, &dispute.id).or_not_found(msg::DISPUTE_NOT_FOUND)?;
    tx.commit()?;
    Ok(refreshed)
}

/// Record a failed outbound call so the ops console can surface it.
/// Local lifecycle state is untouched.
pub fn record_provider_failure(
    conn: &Connection,
    channel_id: &str,
    dispute_id: &str,
    error: &str,
) -> Result<()> {
    let dispute = load_dispute(conn, channel_id, dispute_id)?;
    queries::set_dispute_last_error(conn, &dispute.id, Some(error))?;
    Ok(())
}
