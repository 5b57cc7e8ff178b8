//! Reconciliation surface consumed by the operator console.

use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::idempotency::{self, Begin};
use crate::models::{
    AutoMatchSummary, CreateDiscrepancy, DiscrepancyFilters, DiscrepancySeverity,
    DiscrepancyStatus, IngestSummary, IngestTransaction, MatchStatus, ProviderTransaction,
    ReconStats, ReconciliationDiscrepancy, TransactionFilters,
};
use crate::pagination::Paginated;
use crate::providers::ProviderKind;
use crate::recon;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/channels/{channel_id}/recon/transactions",
            get(list_transactions).post(ingest_transactions),
        )
        .route(
            "/channels/{channel_id}/recon/transactions/{transaction_id}",
            get(get_transaction),
        )
        .route(
            "/channels/{channel_id}/recon/transactions/{transaction_id}/match",
            post(match_transaction),
        )
        .route("/channels/{channel_id}/recon/auto-match", post(auto_match))
        .route(
            "/channels/{channel_id}/recon/discrepancies",
            get(list_discrepancies).post(create_discrepancy),
        )
        .route(
            "/channels/{channel_id}/recon/discrepancies/{discrepancy_id}/status",
            post(update_discrepancy_status),
        )
        .route(
            "/channels/{channel_id}/recon/discrepancies/{discrepancy_id}/resolve",
            post(resolve_discrepancy),
        )
        .route("/channels/{channel_id}/recon/stats", get(recon_stats))
}

#[derive(Deserialize)]
pub struct ChannelPath {
    pub channel_id: String,
}

#[derive(Deserialize)]
pub struct TransactionPath {
    pub channel_id: String,
    pub transaction_id: String,
}

#[derive(Deserialize)]
pub struct DiscrepancyPath {
    pub channel_id: String,
    pub discrepancy_id: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    pub provider: ProviderKind,
    /// Optional caller batch key; when present the whole batch is guarded
    /// by the idempotency ledger on top of the row-level unique index.
    pub batch_key: Option<String>,
    pub transactions: Vec<IngestTransaction>,
}

/// POST /channels/{channel_id}/recon/transactions
pub async fn ingest_transactions(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestSummary>> {
    let mut conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let Some(batch_key) = body.batch_key.clone() else {
        let summary = recon::ingest(&mut conn, &path.channel_id, body.provider, &body.transactions)?;
        return Ok(Json(summary));
    };

    // Ledger-guarded batch: claim, ingest and cache the summary in one
    // transaction so batch redelivery short-circuits without touching rows.
    let scope = idempotency::ingest_scope(body.provider);
    let hash = idempotency::request_hash(&serde_json::to_vec(&body.transactions)?);

    let tx = conn.transaction()?;
    match idempotency::begin(&tx, &path.channel_id, &scope, &batch_key, &hash)? {
        Begin::Duplicate(record) => {
            let summary = record
                .result
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            return Ok(Json(summary));
        }
        Begin::InProgress => {
            return Err(AppError::Conflict(format!(
                "Batch {} is already being ingested",
                batch_key
            )));
        }
        Begin::Fresh => {}
    }

    let mut summary = IngestSummary::default();
    for txn in &body.transactions {
        if txn.provider_txn_id.is_empty() {
            return Err(AppError::Validation("provider_txn_id must not be empty".into()));
        }
        if queries::try_insert_provider_transaction(&tx, &path.channel_id, body.provider, txn)? {
            summary.inserted += 1;
        } else {
            summary.duplicates += 1;
        }
    }

    idempotency::complete(
        &tx,
        &path.channel_id,
        &scope,
        &batch_key,
        &serde_json::to_value(&summary)?,
    )?;
    tx.commit()?;

    tracing::info!(
        "Ingested batch {} for channel {}: {} inserted, {} duplicates",
        batch_key,
        path.channel_id,
        summary.inserted,
        summary.duplicates
    );
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub provider: Option<ProviderKind>,
    pub match_status: Option<MatchStatus>,
    pub txn_type: Option<String>,
    /// Filter by provider-side creation date (unix timestamps)
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    /// Max results to return (default 50, max 100)
    pub limit: Option<i64>,
    /// Offset for pagination (default 0)
    pub offset: Option<i64>,
}

impl ListTransactionsQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// GET /channels/{channel_id}/recon/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Paginated<ProviderTransaction>>> {
    let conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let filters = TransactionFilters {
        provider: query.provider,
        match_status: query.match_status,
        txn_type: query.txn_type.clone(),
        start_date: query.start_date,
        end_date: query.end_date,
    };
    let limit = query.limit();
    let offset = query.offset();
    let (items, total) = queries::list_provider_transactions_paginated(
        &conn,
        &path.channel_id,
        &filters,
        limit,
        offset,
    )?;

    Ok(Json(Paginated::new(items, total, limit, offset)))
}

/// GET /channels/{channel_id}/recon/transactions/{transaction_id}
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(path): Path<TransactionPath>,
) -> Result<Json<ProviderTransaction>> {
    let conn = state.db.get()?;
    let txn = queries::get_provider_transaction(&conn, &path.channel_id, &path.transaction_id)
        .or_not_found(msg::TRANSACTION_NOT_FOUND)?;
    Ok(Json(txn))
}

#[derive(Debug, Deserialize)]
pub struct ManualMatchBody {
    pub order_id: Option<String>,
    pub payout_id: Option<String>,
    pub actor: String,
}

/// POST /channels/{channel_id}/recon/transactions/{transaction_id}/match
pub async fn match_transaction(
    State(state): State<AppState>,
    Path(path): Path<TransactionPath>,
    Json(body): Json<ManualMatchBody>,
) -> Result<Json<ProviderTransaction>> {
    let conn = state.db.get()?;
    let txn = recon::manual_match(
        &conn,
        &path.channel_id,
        &path.transaction_id,
        body.order_id.as_deref(),
        body.payout_id.as_deref(),
        &body.actor,
    )?;
    Ok(Json(txn))
}

#[derive(Debug, Deserialize, Default)]
pub struct AutoMatchBody {
    pub provider: Option<ProviderKind>,
    pub limit: Option<i64>,
}

/// POST /channels/{channel_id}/recon/auto-match
pub async fn auto_match(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
    Json(body): Json<AutoMatchBody>,
) -> Result<Json<AutoMatchSummary>> {
    let conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let limit = body
        .limit
        .unwrap_or(recon::DEFAULT_AUTO_MATCH_LIMIT)
        .clamp(1, 1000);
    let summary = recon::auto_match(&conn, &path.channel_id, body.provider, limit)?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct ListDiscrepanciesQuery {
    pub status: Option<DiscrepancyStatus>,
    pub severity: Option<DiscrepancySeverity>,
    pub discrepancy_type: Option<String>,
    /// Max results to return (default 50, max 100)
    pub limit: Option<i64>,
    /// Offset for pagination (default 0)
    pub offset: Option<i64>,
}

impl ListDiscrepanciesQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// GET /channels/{channel_id}/recon/discrepancies
pub async fn list_discrepancies(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
    Query(query): Query<ListDiscrepanciesQuery>,
) -> Result<Json<Paginated<ReconciliationDiscrepancy>>> {
    let conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let filters = DiscrepancyFilters {
        status: query.status,
        severity: query.severity,
        discrepancy_type: query.discrepancy_type.clone(),
    };
    let limit = query.limit();
    let offset = query.offset();
    let (items, total) =
        queries::list_discrepancies_paginated(&conn, &path.channel_id, &filters, limit, offset)?;

    Ok(Json(Paginated::new(items, total, limit, offset)))
}

/// POST /channels/{channel_id}/recon/discrepancies
pub async fn create_discrepancy(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
    Json(input): Json<CreateDiscrepancy>,
) -> Result<Json<ReconciliationDiscrepancy>> {
    let mut conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let discrepancy = recon::create_discrepancy(&mut conn, &path.channel_id, &input)?;
    Ok(Json(discrepancy))
}

#[derive(Debug, Deserialize)]
pub struct DiscrepancyStatusBody {
    pub status: DiscrepancyStatus,
}

/// POST /channels/{channel_id}/recon/discrepancies/{discrepancy_id}/status
///
/// Only the OPEN -> INVESTIGATING move is permitted here; terminal
/// states go through `resolve`.
pub async fn update_discrepancy_status(
    State(state): State<AppState>,
    Path(path): Path<DiscrepancyPath>,
    Json(body): Json<DiscrepancyStatusBody>,
) -> Result<Json<ReconciliationDiscrepancy>> {
    if body.status != DiscrepancyStatus::Investigating {
        return Err(AppError::Validation(
            "Only the investigating status can be set directly; use resolve for terminal states"
                .into(),
        ));
    }

    let conn = state.db.get()?;
    let discrepancy = recon::mark_investigating(&conn, &path.channel_id, &path.discrepancy_id)?;
    Ok(Json(discrepancy))
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub resolved_by: String,
    pub resolution: String,
    /// true = difference written off (ACCEPTED), false = explained (RESOLVED)
    #[serde(default)]
    pub accepted: bool,
}

/// POST /channels/{channel_id}/recon/discrepancies/{discrepancy_id}/resolve
pub async fn resolve_discrepancy(
    State(state): State<AppState>,
    Path(path): Path<DiscrepancyPath>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<ReconciliationDiscrepancy>> {
    let conn = state.db.get()?;
    let discrepancy = recon::resolve(
        &conn,
        &path.channel_id,
        &path.discrepancy_id,
        &body.resolved_by,
        &body.resolution,
        body.accepted,
    )?;
    Ok(Json(discrepancy))
}

/// GET /channels/{channel_id}/recon/stats
pub async fn recon_stats(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
) -> Result<Json<ReconStats>> {
    let conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let stats = ReconStats {
        transactions: queries::transactions_by_match_status(&conn, &path.channel_id)?,
        discrepancies: queries::discrepancies_by_status(&conn, &path.channel_id)?,
    };
    Ok(Json(stats))
}
