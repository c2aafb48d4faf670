use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    handlers::{parse_object_id, ApiError},
    models::{
        leaderboard::{
            BoardKind, LeaderboardPage, LeaderboardQuery, RankQuery, RankView, TimeWindow,
        },
        ApiResponse,
    },
    services::{leaderboard_service::resolve_paging, AppState},
};

fn parse_board(value: Option<&str>) -> Result<BoardKind, ApiError> {
    match value {
        None => Ok(BoardKind::Xp),
        Some(raw) => BoardKind::parse(raw).ok_or_else(|| {
            ApiError::bad_request(format!(
                "Unknown board '{}': expected xp, problems or streak",
                raw
            ))
        }),
    }
}

fn parse_window(value: Option<&str>) -> Result<Option<TimeWindow>, ApiError> {
    match value {
        None | Some("all") => Ok(None),
        Some(raw) => TimeWindow::parse(raw).map(Some).ok_or_else(|| {
            ApiError::bad_request(format!(
                "Unknown window '{}': expected all, day, week or month",
                raw
            ))
        }),
    }
}

/// GET /gamification/leaderboard?board=&window=&page=&limit=
pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<ApiResponse<LeaderboardPage>>, ApiError> {
    let board = parse_board(query.board.as_deref())?;
    let window = parse_window(query.window.as_deref())?;
    let (page, limit) = resolve_paging(query.page, query.limit, &state.config.gamification);

    let page = state
        .leaderboard_service()
        .load_page(board, window, page, limit, Utc::now())
        .await?;

    Ok(Json(ApiResponse::ok(page)))
}

/// GET /gamification/users/{id}/rank?board=&window=
pub async fn get_user_rank(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<RankQuery>,
) -> Result<Json<ApiResponse<RankView>>, ApiError> {
    let user_id = parse_object_id(&user_id, "user_id")?;
    let board = parse_board(query.board.as_deref())?;
    let window = parse_window(query.window.as_deref())?;

    let view = state
        .leaderboard_service()
        .rank_for_user(board, window, user_id, Utc::now())
        .await?;

    if view.rank.is_none() {
        return Ok(Json(ApiResponse::ok_with_message(
            view,
            "User is not ranked on this board",
        )));
    }

    Ok(Json(ApiResponse::ok(view)))
}
