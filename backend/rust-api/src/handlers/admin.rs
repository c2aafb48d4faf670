use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    events::DashboardEvent,
    extractors::ValidatedJson,
    handlers::{parse_object_id, ApiError},
    models::{
        badge::{BadgeView, CreateBadgeRequest, ListBadgesQuery, UpdateBadgeRequest},
        ApiResponse,
    },
    services::{badge_service::BadgeService, AppState},
};

fn badge_service(state: &AppState) -> BadgeService {
    BadgeService::new(
        state.mongo.clone(),
        state.events.clone(),
        state.config.gamification.base_xp,
    )
}

/// Catalog edits can change XP rewards and therefore future standings, so
/// every write drops the cached leaderboard pages.
fn invalidate_after_catalog_edit(state: &AppState) {
    state.leaderboard_cache.invalidate_all("badge_catalog");
    state.events.broadcast(DashboardEvent::LeaderboardInvalidated {
        reason: "badge_catalog".to_string(),
    });
}

/// GET /admin/badges?include_inactive=
pub async fn list_badges(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListBadgesQuery>,
) -> Result<Json<ApiResponse<Vec<BadgeView>>>, ApiError> {
    let badges = badge_service(&state).list(query.include_inactive).await?;
    Ok(Json(ApiResponse::ok(
        badges.into_iter().map(BadgeView::from).collect(),
    )))
}

/// POST /admin/badges
pub async fn create_badge(
    State(state): State<Arc<AppState>>,
    ValidatedJson(payload): ValidatedJson<CreateBadgeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BadgeView>>), ApiError> {
    let badge = badge_service(&state).create(payload, Utc::now()).await?;
    invalidate_after_catalog_edit(&state);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(BadgeView::from(badge))),
    ))
}

/// GET /admin/badges/{id}
pub async fn get_badge(
    State(state): State<Arc<AppState>>,
    Path(badge_id): Path<String>,
) -> Result<Json<ApiResponse<BadgeView>>, ApiError> {
    let badge_id = parse_object_id(&badge_id, "badge_id")?;
    let badge = badge_service(&state)
        .find_by_id(badge_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Badge not found"))?;
    Ok(Json(ApiResponse::ok(BadgeView::from(badge))))
}

/// PATCH /admin/badges/{id}
pub async fn update_badge(
    State(state): State<Arc<AppState>>,
    Path(badge_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<UpdateBadgeRequest>,
) -> Result<Json<ApiResponse<BadgeView>>, ApiError> {
    let badge_id = parse_object_id(&badge_id, "badge_id")?;
    let badge = badge_service(&state)
        .update(badge_id, payload, Utc::now())
        .await?;
    invalidate_after_catalog_edit(&state);
    Ok(Json(ApiResponse::ok(BadgeView::from(badge))))
}

/// DELETE /admin/badges/{id} — soft delete, the badge is only deactivated.
pub async fn delete_badge(
    State(state): State<Arc<AppState>>,
    Path(badge_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let badge_id = parse_object_id(&badge_id, "badge_id")?;
    badge_service(&state).deactivate(badge_id, Utc::now()).await?;
    invalidate_after_catalog_edit(&state);
    Ok(Json(ApiResponse::ok_with_message(
        serde_json::json!({ "id": badge_id.to_hex() }),
        "Badge deactivated",
    )))
}
