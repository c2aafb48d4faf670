use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    events::DashboardEvent,
    extractors::ValidatedJson,
    handlers::{parse_object_id, ApiError},
    metrics::ACTIVITY_RECORDED_TOTAL,
    middlewares::auth::JwtClaims,
    models::{
        badge::{BadgeState, ClaimBadgeResponse},
        gamification::{LevelHistoryItem, ProfileResponse, XpSource},
        progress::{ActivityItem, ActivityKind, RecordActivityRequest, RecordActivityResponse},
        ApiResponse,
    },
    services::{
        badge_service::BadgeService,
        gamification_service::{level_progress_parts, GamificationService},
        progress_service::ProgressService,
        xp, AppState,
    },
};

/// How many activity log entries the profile returns.
const RECENT_ACTIVITY_LIMIT: usize = 20;

fn gamification_service(state: &AppState) -> GamificationService {
    GamificationService::new(
        state.mongo.clone(),
        state.events.clone(),
        state.config.gamification.base_xp,
    )
}

fn badge_service(state: &AppState) -> BadgeService {
    BadgeService::new(
        state.mongo.clone(),
        state.events.clone(),
        state.config.gamification.base_xp,
    )
}

/// GET /gamification/profile
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<ApiResponse<ProfileResponse>>, ApiError> {
    let user_id = parse_object_id(&claims.sub, "user_id")?;
    let now = Utc::now();

    let service = gamification_service(&state);
    let user = service
        .find_user(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let gamification = service.load_or_default(user_id, now).await?;
    let progress = ProgressService::new(state.mongo.clone())
        .load(user_id, now)
        .await?;
    let badges = badge_service(&state).badge_states(user_id, now).await?;

    let parts = level_progress_parts(
        gamification.total_xp,
        gamification.current_level,
        state.config.gamification.base_xp,
    );

    let recent_activity: Vec<ActivityItem> = progress
        .activity_log
        .iter()
        .rev()
        .take(RECENT_ACTIVITY_LIMIT)
        .cloned()
        .map(ActivityItem::from)
        .collect();

    Ok(Json(ApiResponse::ok(ProfileResponse {
        user_id: user_id.to_hex(),
        username: user.username.clone(),
        display_name: user.display_name.clone(),
        total_xp: gamification.total_xp,
        current_level: gamification.current_level,
        xp_into_level: parts.xp_into_level,
        xp_for_next_level: parts.xp_for_next_level,
        level_progress: parts.fraction,
        problems_solved: progress.problems_solved,
        current_streak: progress.current_streak,
        longest_streak: progress.longest_streak,
        last_xp_gained_at: gamification.last_xp_gained_at,
        last_activity_at: progress.last_activity_at,
        badges,
        level_history: gamification
            .level_history
            .into_iter()
            .map(LevelHistoryItem::from)
            .collect(),
        recent_activity,
    })))
}

/// POST /gamification/activity
///
/// One solve drives the whole pipeline: ledger append, streak fold, XP
/// reward, level reconciliation, badge evaluation, cache invalidation and
/// the dashboard broadcast.
pub async fn record_activity(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(payload): ValidatedJson<RecordActivityRequest>,
) -> Result<Json<ApiResponse<RecordActivityResponse>>, ApiError> {
    let user_id = parse_object_id(&claims.sub, "user_id")?;
    let now = Utc::now();

    let gamification = gamification_service(&state);
    let progress = ProgressService::new(state.mongo.clone())
        .record(user_id, &payload, now)
        .await?;

    ACTIVITY_RECORDED_TOTAL
        .with_label_values(&[payload.kind.as_str()])
        .inc();

    let mut xp_awarded = 0_i64;
    let mut unlocked_badges = Vec::new();

    // Solves earn XP from the streak they just produced; unsolves earn
    // nothing and cannot unlock badges.
    let (total_xp, current_level, leveled_up) = match payload.kind {
        ActivityKind::Solved => {
            xp_awarded = xp::xp_for_solve(payload.difficulty, progress.current_streak);
            let award = gamification
                .award_xp(user_id, xp_awarded, XpSource::Solve, now)
                .await?;

            let evaluation = badge_service(&state)
                .evaluate_and_unlock(
                    user_id,
                    crate::models::badge::EligibilityCounters {
                        problems_solved: i64::from(progress.problems_solved),
                        longest_streak: i64::from(progress.longest_streak),
                        total_xp: award.total_xp,
                    },
                    now,
                )
                .await?;
            unlocked_badges = evaluation.unlocked;

            match evaluation.last_award {
                Some(bonus) => (
                    bonus.total_xp,
                    bonus.new_level,
                    award.leveled_up() || bonus.new_level > award.new_level,
                ),
                None => (award.total_xp, award.new_level, award.leveled_up()),
            }
        }
        ActivityKind::Unsolved => {
            let current = gamification.load_or_default(user_id, now).await?;
            (current.total_xp, current.current_level, false)
        }
    };

    state.leaderboard_cache.invalidate_all("activity");
    state.events.broadcast(DashboardEvent::ActivityRecorded {
        user_id: user_id.to_hex(),
        kind: payload.kind,
        problem_id: payload.problem_id.clone(),
        xp_awarded,
        total_xp,
        current_level,
    });
    state.events.broadcast(DashboardEvent::LeaderboardInvalidated {
        reason: "activity".to_string(),
    });

    Ok(Json(ApiResponse::ok(RecordActivityResponse {
        kind: payload.kind,
        problem_id: payload.problem_id,
        xp_awarded,
        total_xp,
        current_level,
        leveled_up,
        problems_solved: progress.problems_solved,
        current_streak: progress.current_streak,
        longest_streak: progress.longest_streak,
        unlocked_badges,
    })))
}

/// GET /gamification/badges
pub async fn list_badges(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<ApiResponse<Vec<BadgeState>>>, ApiError> {
    let user_id = parse_object_id(&claims.sub, "user_id")?;
    let states = badge_service(&state)
        .badge_states(user_id, Utc::now())
        .await?;
    Ok(Json(ApiResponse::ok(states)))
}

/// POST /gamification/badges/{id}/claim
pub async fn claim_badge(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(badge_id): Path<String>,
) -> Result<Json<ApiResponse<ClaimBadgeResponse>>, ApiError> {
    let user_id = parse_object_id(&claims.sub, "user_id")?;
    let badge_id = parse_object_id(&badge_id, "badge_id")?;

    let claim = badge_service(&state)
        .claim(user_id, badge_id, Utc::now())
        .await?;

    if claim.already_unlocked {
        return Ok(Json(ApiResponse::ok_with_message(
            claim,
            "Badge already unlocked",
        )));
    }

    if claim.xp_awarded > 0 {
        state.leaderboard_cache.invalidate_all("badge_claim");
        state.events.broadcast(DashboardEvent::LeaderboardInvalidated {
            reason: "badge_claim".to_string(),
        });
    }

    Ok(Json(ApiResponse::ok(claim)))
}
