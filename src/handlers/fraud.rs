//! Fraud scoring surface.
//!
//! The order subsystem calls `check` synchronously before confirming an
//! order; the batch variant backs scheduled re-screening jobs.

use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::fraud;
use crate::models::{
    BatchFraudSummary, FraudCheckResult, FraudScore, FraudScoreFilters, RiskLevel,
};
use crate::pagination::Paginated;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/channels/{channel_id}/fraud/check", post(check_order))
        .route("/channels/{channel_id}/fraud/check/batch", post(check_batch))
        .route("/channels/{channel_id}/fraud/scores", get(list_scores))
}

#[derive(Deserialize)]
pub struct ChannelPath {
    pub channel_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckOrderBody {
    pub order_id: String,
}

/// POST /channels/{channel_id}/fraud/check
///
/// Appends a new history row on every call; callers must not re-check the
/// same order without intent, since history feeds future scores.
pub async fn check_order(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
    Json(body): Json<CheckOrderBody>,
) -> Result<Json<FraudCheckResult>> {
    let conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let result = fraud::evaluate(&conn, &path.channel_id, &body.order_id)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct CheckBatchBody {
    pub order_ids: Vec<String>,
}

/// POST /channels/{channel_id}/fraud/check/batch
pub async fn check_batch(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
    Json(body): Json<CheckBatchBody>,
) -> Result<Json<BatchFraudSummary>> {
    if body.order_ids.is_empty() {
        return Err(AppError::Validation("order_ids must not be empty".into()));
    }

    let conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let summary = fraud::evaluate_batch(&conn, &path.channel_id, &body.order_ids)?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct ListScoresQuery {
    pub order_id: Option<String>,
    pub account_id: Option<String>,
    pub risk_level: Option<RiskLevel>,
    /// Max results to return (default 50, max 100)
    pub limit: Option<i64>,
    /// Offset for pagination (default 0)
    pub offset: Option<i64>,
}

impl ListScoresQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// GET /channels/{channel_id}/fraud/scores
pub async fn list_scores(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
    Query(query): Query<ListScoresQuery>,
) -> Result<Json<Paginated<FraudScore>>> {
    let conn = state.db.get()?;
    queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;

    let filters = FraudScoreFilters {
        order_id: query.order_id.clone(),
        account_id: query.account_id.clone(),
        risk_level: query.risk_level,
    };
    let limit = query.limit();
    let offset = query.offset();
    let (items, total) =
        queries::list_fraud_scores_paginated(&conn, &path.channel_id, &filters, limit, offset)?;

    Ok(Json(Paginated::new(items, total, limit, offset)))
}
