//! Dispute surface consumed by the operator console.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::disputes;
use crate::error::{msg, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::models::{
    Dispute, DisputeFilters, DisputeStats, DisputeStatus, DisputeTimelineEntry, EvidencePack,
    EvidenceRecommendation, UpdateEvidencePack,
};
use crate::pagination::{Paginated, PaginationQuery};
use crate::providers::{Gateway, ProviderKind};
use crate::util::request_meta;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/channels/{channel_id}/disputes", get(list_disputes))
        .route("/channels/{channel_id}/disputes/stats", get(dispute_stats))
        .route("/channels/{channel_id}/disputes/{dispute_id}", get(get_dispute))
        .route(
            "/channels/{channel_id}/disputes/{dispute_id}/timeline",
            get(get_timeline),
        )
        .route(
            "/channels/{channel_id}/disputes/{dispute_id}/evidence",
            get(get_evidence).post(build_evidence).put(update_evidence),
        )
        .route(
            "/channels/{channel_id}/disputes/{dispute_id}/evidence/ready",
            post(mark_evidence_ready),
        )
        .route(
            "/channels/{channel_id}/disputes/{dispute_id}/evidence/submit",
            post(submit_evidence),
        )
        .route(
            "/channels/{channel_id}/disputes/{dispute_id}/recommendation",
            get(get_recommendation),
        )
        .route(
            "/channels/{channel_id}/disputes/{dispute_id}/needs-manual",
            post(mark_needs_manual),
        )
        .route(
            "/channels/{channel_id}/disputes/{dispute_id}/status",
            post(update_status),
        )
        .route(
            "/channels/{channel_id}/disputes/{dispute_id}/sync",
            post(sync_case),
        )
}

#[derive(Deserialize)]
pub struct ChannelPath {
    pub channel_id: String,
}

#[derive(Deserialize)]
pub struct DisputePath {
    pub channel_id: String,
    pub dispute_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListDisputesQuery {
    pub status: Option<DisputeStatus>,
    pub provider: Option<ProviderKind>,
    pub needs_manual: Option<bool>,
    /// Max results to return (default 50, max 100)
    pub limit: Option<i64>,
    /// Offset for pagination (default 0)
    pub offset: Option<i64>,
}

impl ListDisputesQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// GET /channels/{channel_id}/disputes
pub async fn list_disputes(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
    Query(query): Query<ListDisputesQuery>,
) -> Result<Json<Paginated<Dispute>>> {
    let conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let filters = DisputeFilters {
        status: query.status,
        provider: query.provider,
        needs_manual: query.needs_manual,
    };
    let limit = query.limit();
    let offset = query.offset();
    let (items, total) =
        queries::list_disputes_paginated(&conn, &path.channel_id, &filters, limit, offset)?;

    Ok(Json(Paginated::new(items, total, limit, offset)))
}

/// GET /channels/{channel_id}/disputes/stats
pub async fn dispute_stats(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
) -> Result<Json<DisputeStats>> {
    let conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let stats = queries::get_dispute_stats(&conn, &path.channel_id)?;
    Ok(Json(stats))
}

/// GET /channels/{channel_id}/disputes/{dispute_id}
pub async fn get_dispute(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
) -> Result<Json<Dispute>> {
    let conn = state.db.get()?;
    let dispute = queries::get_dispute(&conn, &path.channel_id, &path.dispute_id)
        .or_not_found(msg::DISPUTE_NOT_FOUND)?;
    Ok(Json(dispute))
}

/// GET /channels/{channel_id}/disputes/{dispute_id}/timeline
pub async fn get_timeline(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<DisputeTimelineEntry>>> {
    let conn = state.db.get()?;
    let dispute = queries::get_dispute(&conn, &path.channel_id, &path.dispute_id)
        .or_not_found(msg::DISPUTE_NOT_FOUND)?;

    let limit = page.limit();
    let offset = page.offset();
    let (items, total) = queries::list_timeline_paginated(&conn, &dispute.id, limit, offset)?;

    Ok(Json(Paginated::new(items, total, limit, offset)))
}

/// GET /channels/{channel_id}/disputes/{dispute_id}/evidence
pub async fn get_evidence(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
) -> Result<Json<EvidencePack>> {
    let conn = state.db.get()?;
    let dispute = queries::get_dispute(&conn, &path.channel_id, &path.dispute_id)
        .or_not_found(msg::DISPUTE_NOT_FOUND)?;
    let pack = queries::get_evidence_pack_by_dispute(&conn, &dispute.id)
        .or_not_found(msg::EVIDENCE_NOT_FOUND)?;
    Ok(Json(pack))
}

#[derive(Debug, serde::Serialize)]
pub struct DisputeWithEvidence {
    pub dispute: Dispute,
    pub evidence_pack: EvidencePack,
}

/// POST /channels/{channel_id}/disputes/{dispute_id}/evidence
pub async fn build_evidence(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
) -> Result<Json<DisputeWithEvidence>> {
    let mut conn = state.db.get()?;
    let (dispute, evidence_pack) =
        disputes::build_evidence(&mut conn, &path.channel_id, &path.dispute_id)?;
    Ok(Json(DisputeWithEvidence {
        dispute,
        evidence_pack,
    }))
}

/// PUT /channels/{channel_id}/disputes/{dispute_id}/evidence
pub async fn update_evidence(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
    Json(input): Json<UpdateEvidencePack>,
) -> Result<Json<EvidencePack>> {
    let mut conn = state.db.get()?;
    let pack = disputes::update_evidence(&mut conn, &path.channel_id, &path.dispute_id, &input)?;
    Ok(Json(pack))
}

#[derive(Debug, Deserialize)]
pub struct ActorBody {
    pub actor: String,
}

/// POST /channels/{channel_id}/disputes/{dispute_id}/evidence/ready
pub async fn mark_evidence_ready(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
    Json(body): Json<ActorBody>,
) -> Result<Json<DisputeWithEvidence>> {
    let mut conn = state.db.get()?;
    let (dispute, evidence_pack) =
        disputes::mark_evidence_ready(&mut conn, &path.channel_id, &path.dispute_id, &body.actor)?;
    Ok(Json(DisputeWithEvidence {
        dispute,
        evidence_pack,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SubmitEvidenceBody {
    pub submitted_by: String,
}

/// POST /channels/{channel_id}/disputes/{dispute_id}/evidence/submit
///
/// The outbound provider call happens before any local write. On provider
/// failure the dispute only records `last_error`; pack and status are
/// untouched, so the submission is safely retryable.
pub async fn submit_evidence(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
    headers: HeaderMap,
    Json(body): Json<SubmitEvidenceBody>,
) -> Result<Json<DisputeWithEvidence>> {
    let (channel, dispute, pack) = {
        let conn = state.db.get()?;
        let channel = queries::get_channel_by_id(&conn, &path.channel_id)
            .or_not_found(msg::CHANNEL_NOT_FOUND)?;
        let (dispute, pack) =
            disputes::ensure_submittable(&conn, &path.channel_id, &path.dispute_id)?;
        (channel, dispute, pack)
    };

    let gateway = Gateway::for_channel(&channel);
    if let Err(e) = gateway.submit_evidence(&dispute.provider_case_id, &pack).await {
        let conn = state.db.get()?;
        disputes::record_provider_failure(&conn, &path.channel_id, &dispute.id, &e.to_string())?;
        return Err(e);
    }

    let mut conn = state.db.get()?;
    let (dispute, evidence_pack) = disputes::apply_evidence_submitted(
        &mut conn,
        &path.channel_id,
        &path.dispute_id,
        &body.submitted_by,
        request_meta(&headers),
    )?;

    Ok(Json(DisputeWithEvidence {
        dispute,
        evidence_pack,
    }))
}

/// GET /channels/{channel_id}/disputes/{dispute_id}/recommendation
///
/// Advisory auto-respond recommendation from evidence strength. Never
/// transitions the dispute.
pub async fn get_recommendation(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
) -> Result<Json<EvidenceRecommendation>> {
    let conn = state.db.get()?;
    let dispute = queries::get_dispute(&conn, &path.channel_id, &path.dispute_id)
        .or_not_found(msg::DISPUTE_NOT_FOUND)?;
    let pack = queries::get_evidence_pack_by_dispute(&conn, &dispute.id)
        .or_not_found(msg::EVIDENCE_NOT_FOUND)?;
    Ok(Json(disputes::evidence::recommend(&pack)))
}

#[derive(Debug, Deserialize)]
pub struct NeedsManualBody {
    pub reason: String,
    pub actor: String,
}

/// POST /channels/{channel_id}/disputes/{dispute_id}/needs-manual
pub async fn mark_needs_manual(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
    headers: HeaderMap,
    Json(body): Json<NeedsManualBody>,
) -> Result<Json<Dispute>> {
    let mut conn = state.db.get()?;
    let dispute = disputes::mark_needs_manual(
        &mut conn,
        &path.channel_id,
        &path.dispute_id,
        &body.reason,
        &body.actor,
        request_meta(&headers),
    )?;
    Ok(Json(dispute))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: DisputeStatus,
    pub actor: String,
}

/// POST /channels/{channel_id}/disputes/{dispute_id}/status
pub async fn update_status(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
    headers: HeaderMap,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<Dispute>> {
    let mut conn = state.db.get()?;
    let dispute = disputes::update_status(
        &mut conn,
        &path.channel_id,
        &path.dispute_id,
        body.status,
        &body.actor,
        request_meta(&headers),
    )?;
    Ok(Json(dispute))
}

/// POST /channels/{channel_id}/disputes/{dispute_id}/sync
///
/// Fetches the provider's case snapshot and journals it. Never changes
/// the local authoritative status.
pub async fn sync_case(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
) -> Result<Json<Dispute>> {
    let (channel, dispute) = {
        let conn = state.db.get()?;
        let channel = queries::get_channel_by_id(&conn, &path.channel_id)
            .or_not_found(msg::CHANNEL_NOT_FOUND)?;
        let dispute = queries::get_dispute(&conn, &path.channel_id, &path.dispute_id)
            .or_not_found(msg::DISPUTE_NOT_FOUND)?;
        (channel, dispute)
    };

    let gateway = Gateway::for_channel(&channel);
    let case = match gateway.fetch_case(&dispute.provider_case_id).await {
        Ok(case) => case,
        Err(e) => {
            let conn = state.db.get()?;
            disputes::record_provider_failure(&conn, &path.channel_id, &dispute.id, &e.to_string())?;
            return Err(e);
        }
    };

    let mut conn = state.db.get()?;
    let dispute = disputes::record_sync(&mut conn, &path.channel_id, &dispute.id, &case)?;
    Ok(Json(dispute))
}
