//! Minimal channel registration surface so the engine is operable on its
//! own. Channel ownership lives in the catalog subsystem.

use axum::extract::State;
use axum::routing::get;
use axum::Router;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::models::{Channel, CreateChannel};
use crate::pagination::{Paginated, PaginationQuery};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/channels", get(list_channels).post(create_channel))
        .route("/channels/{channel_id}", get(get_channel))
}

#[derive(serde::Deserialize)]
pub struct ChannelPath {
    pub channel_id: String,
}

/// POST /channels
pub async fn create_channel(
    State(state): State<AppState>,
    Json(input): Json<CreateChannel>,
) -> Result<Json<Channel>> {
    if input.name.trim().is_empty() {
        return Err(AppError::Validation("Channel name must not be empty".into()));
    }
    if input.webhook_secret.is_empty() {
        return Err(AppError::Validation("webhook_secret must not be empty".into()));
    }

    let conn = state.db.get()?;
    let channel = queries::create_channel(&conn, &input)?;

    tracing::info!("Channel registered: {} ({})", channel.name, channel.id);
    Ok(Json(channel))
}

/// GET /channels
pub async fn list_channels(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<Channel>>> {
    let conn = state.db.get()?;
    let limit = page.limit();
    let offset = page.offset();
    let (items, total) = queries::list_channels_paginated(&conn, limit, offset)?;
    Ok(Json(Paginated::new(items, total, limit, offset)))
}

/// GET /channels/{channel_id}
pub async fn get_channel(
    State(state): State<AppState>,
    Path(path): Path<ChannelPath>,
) -> Result<Json<Channel>> {
    let conn = state.db.get()?;
    let channel =
        queries::get_channel_by_id(&conn, &path.channel_id).or_not_found(msg::CHANNEL_NOT_FOUND)?;
    Ok(Json(channel))
}
