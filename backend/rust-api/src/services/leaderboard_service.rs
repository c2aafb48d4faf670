use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    Database,
};

use crate::config::GamificationConfig;
use crate::metrics::{track_db_operation, LEADERBOARD_REBUILDS_TOTAL};
use crate::models::leaderboard::{
    BoardKind, LeaderboardEntry, LeaderboardPage, RankView, TimeWindow,
};
use crate::services::leaderboard_cache::{cache_signature, LeaderboardCache};
use crate::services::GamificationError;
use crate::utils::time::chrono_to_bson;

struct BoardSpec {
    collection: &'static str,
    score_field: &'static str,
    activity_field: &'static str,
}

fn board_spec(board: BoardKind) -> BoardSpec {
    match board {
        BoardKind::Xp => BoardSpec {
            collection: "user_gamification",
            score_field: "totalXp",
            activity_field: "lastXpGainedAt",
        },
        BoardKind::Problems => BoardSpec {
            collection: "user_progress",
            score_field: "problemsSolved",
            activity_field: "lastActivityAt",
        },
        BoardKind::Streak => BoardSpec {
            collection: "user_progress",
            score_field: "currentStreak",
            activity_field: "lastActivityAt",
        },
    }
}

/// Stages shared by page and rank queries: join the owning user, keep active
/// accounts, apply the optional recency window, sort, project the row shape.
///
/// Sort order is score descending with most recent activity breaking ties;
/// `_id` last keeps the order stable when both are equal.
pub(crate) fn board_pipeline(board: BoardKind, window_start: Option<DateTime<Utc>>) -> Vec<Document> {
    let spec = board_spec(board);
    let mut pipeline = vec![
        doc! { "$lookup": {
            "from": "users",
            "localField": "userId",
            "foreignField": "_id",
            "as": "user",
        }},
        doc! { "$unwind": "$user" },
        doc! { "$match": { "user.isActive": true } },
    ];
    if let Some(start) = window_start {
        pipeline.push(doc! { "$match": {
            spec.activity_field: { "$gte": chrono_to_bson(start) }
        }});
    }
    pipeline.push(doc! { "$sort": {
        spec.score_field: -1,
        spec.activity_field: -1,
        "_id": 1,
    }});
    pipeline.push(doc! { "$project": {
        "_id": 0,
        "userId": 1,
        "score": format!("${}", spec.score_field),
        "lastActiveAt": format!("${}", spec.activity_field),
        "username": "$user.username",
        "displayName": "$user.displayName",
    }});
    pipeline
}

/// Clamp page/limit query values against configured bounds.
pub(crate) fn resolve_paging(
    page: Option<u32>,
    limit: Option<u32>,
    config: &GamificationConfig,
) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit
        .unwrap_or(config.leaderboard_page_size)
        .clamp(1, config.leaderboard_max_page_size);
    (page, limit)
}

pub(crate) fn entry_from_document(doc: &Document, rank: u64) -> Result<LeaderboardEntry> {
    let user_id = doc
        .get_object_id("userId")
        .context("leaderboard row missing userId")?;
    let score = doc
        .get_i64("score")
        .or_else(|_| doc.get_i32("score").map(|v| v as i64))
        .unwrap_or(0);
    let username = doc.get_str("username").unwrap_or_default().to_string();
    let display_name = doc.get_str("displayName").ok().map(str::to_string);
    let last_active_at = doc
        .get_datetime("lastActiveAt")
        .ok()
        .and_then(|dt| DateTime::from_timestamp_millis(dt.timestamp_millis()));

    Ok(LeaderboardEntry {
        rank,
        user_id: user_id.to_hex(),
        username,
        display_name,
        score,
        last_active_at,
    })
}

/// Computes ranked boards with aggregation pipelines and caches the pages.
pub struct LeaderboardService {
    mongo: Database,
    cache: LeaderboardCache,
}

impl LeaderboardService {
    pub fn new(mongo: Database, cache: LeaderboardCache) -> Self {
        Self { mongo, cache }
    }

    /// One page of a board, from cache when fresh.
    pub async fn load_page(
        &self,
        board: BoardKind,
        window: Option<TimeWindow>,
        page: u32,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<LeaderboardPage, GamificationError> {
        let signature = cache_signature(board, window, page, limit);
        if let Some(cached) = self.cache.get(&signature) {
            return Ok(cached);
        }

        let computed = self.compute_page(board, window, page, limit, now).await?;
        self.cache.insert(signature, computed.clone());
        Ok(computed)
    }

    async fn compute_page(
        &self,
        board: BoardKind,
        window: Option<TimeWindow>,
        page: u32,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<LeaderboardPage, GamificationError> {
        let spec = board_spec(board);
        let window_start = window.map(|w| w.start_from(now));
        let skip = u64::from(page - 1) * u64::from(limit);

        let mut pipeline = board_pipeline(board, window_start);
        pipeline.push(doc! { "$skip": skip as i64 });
        pipeline.push(doc! { "$limit": i64::from(limit) });

        let collection = self.mongo.collection::<Document>(spec.collection);
        let docs: Vec<Document> = track_db_operation("aggregate", spec.collection, async {
            collection
                .aggregate(pipeline)
                .await
                .context("Failed to run leaderboard aggregation")?
                .try_collect()
                .await
                .context("Failed to read leaderboard rows")
        })
        .await?;

        let mut entries = Vec::with_capacity(docs.len());
        for (idx, doc) in docs.iter().enumerate() {
            entries.push(entry_from_document(doc, skip + idx as u64 + 1)?);
        }

        let total_participants = self.count_participants(board, window_start).await?;

        LEADERBOARD_REBUILDS_TOTAL
            .with_label_values(&[board.as_str()])
            .inc();
        tracing::debug!(
            board = board.as_str(),
            page,
            limit,
            total_participants,
            "Leaderboard page computed"
        );

        Ok(LeaderboardPage {
            board,
            window,
            page,
            limit,
            total_participants,
            entries,
        })
    }

    async fn count_participants(
        &self,
        board: BoardKind,
        window_start: Option<DateTime<Utc>>,
    ) -> Result<u64, GamificationError> {
        let spec = board_spec(board);
        let mut pipeline = vec![
            doc! { "$lookup": {
                "from": "users",
                "localField": "userId",
                "foreignField": "_id",
                "as": "user",
            }},
            doc! { "$unwind": "$user" },
            doc! { "$match": { "user.isActive": true } },
        ];
        if let Some(start) = window_start {
            pipeline.push(doc! { "$match": {
                spec.activity_field: { "$gte": chrono_to_bson(start) }
            }});
        }
        pipeline.push(doc! { "$count": "total" });

        let collection = self.mongo.collection::<Document>(spec.collection);
        let result: Option<Document> = track_db_operation("aggregate", spec.collection, async {
            let mut cursor = collection
                .aggregate(pipeline)
                .await
                .context("Failed to count leaderboard participants")?;
            cursor
                .try_next()
                .await
                .context("Failed to read participant count")
        })
        .await?;

        let total = result
            .and_then(|doc| {
                doc.get_i64("total")
                    .or_else(|_| doc.get_i32("total").map(|v| v as i64))
                    .ok()
            })
            .unwrap_or(0);
        Ok(total.max(0) as u64)
    }

    /// Position of one user on a board, found by walking the full sorted
    /// aggregation. Linear, but runs only for explicit rank lookups.
    pub async fn rank_for_user(
        &self,
        board: BoardKind,
        window: Option<TimeWindow>,
        user_id: ObjectId,
        now: DateTime<Utc>,
    ) -> Result<RankView, GamificationError> {
        let spec = board_spec(board);
        let window_start = window.map(|w| w.start_from(now));
        let pipeline = board_pipeline(board, window_start);

        let collection = self.mongo.collection::<Document>(spec.collection);
        let mut cursor = track_db_operation("aggregate", spec.collection, async {
            collection
                .aggregate(pipeline)
                .await
                .context("Failed to run rank aggregation")
        })
        .await?;

        let mut position: u64 = 0;
        let mut rank = None;
        let mut score = 0_i64;

        while let Some(doc) = cursor
            .try_next()
            .await
            .context("Failed to read rank rows")?
        {
            position += 1;
            let is_target = doc
                .get_object_id("userId")
                .map(|id| id == user_id)
                .unwrap_or(false);
            if rank.is_none() && is_target {
                rank = Some(position);
                score = doc
                    .get_i64("score")
                    .or_else(|_| doc.get_i32("score").map(|v| v as i64))
                    .unwrap_or(0);
            }
        }

        // Off-board users still get their lifetime score reported.
        if rank.is_none() {
            score = self.user_score(board, user_id).await?;
        }

        Ok(RankView {
            user_id: user_id.to_hex(),
            board,
            window,
            rank,
            score,
            total_participants: position,
        })
    }

    async fn user_score(
        &self,
        board: BoardKind,
        user_id: ObjectId,
    ) -> Result<i64, GamificationError> {
        let spec = board_spec(board);
        let doc = self
            .mongo
            .collection::<Document>(spec.collection)
            .find_one(doc! { "userId": user_id })
            .projection(doc! { spec.score_field: 1 })
            .await
            .context("Failed to load user score")?;

        let score = doc
            .and_then(|d| {
                d.get_i64(spec.score_field)
                    .or_else(|_| d.get_i32(spec.score_field).map(|v| v as i64))
                    .ok()
            })
            .unwrap_or(0);
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{self, oid::ObjectId};

    #[test]
    fn test_pipeline_stage_order_without_window() {
        let pipeline = board_pipeline(BoardKind::Xp, None);
        assert_eq!(pipeline.len(), 5);
        assert!(pipeline[0].contains_key("$lookup"));
        assert!(pipeline[1].contains_key("$unwind"));
        assert!(pipeline[2].contains_key("$match"));
        assert!(pipeline[3].contains_key("$sort"));
        assert!(pipeline[4].contains_key("$project"));
    }

    #[test]
    fn test_pipeline_window_adds_activity_match() {
        let pipeline = board_pipeline(BoardKind::Problems, Some(Utc::now()));
        assert_eq!(pipeline.len(), 6);
        let window_match = pipeline[3].get_document("$match").unwrap();
        assert!(window_match.contains_key("lastActivityAt"));
    }

    #[test]
    fn test_pipeline_sort_keys_per_board() {
        let pipeline = board_pipeline(BoardKind::Streak, None);
        let sort = pipeline[3].get_document("$sort").unwrap();
        let keys: Vec<&str> = sort.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["currentStreak", "lastActivityAt", "_id"]);
        assert_eq!(sort.get_i32("currentStreak").unwrap(), -1);
        assert_eq!(sort.get_i32("lastActivityAt").unwrap(), -1);
        assert_eq!(sort.get_i32("_id").unwrap(), 1);
    }

    #[test]
    fn test_pipeline_joins_users_on_user_id() {
        let pipeline = board_pipeline(BoardKind::Xp, None);
        let lookup = pipeline[0].get_document("$lookup").unwrap();
        assert_eq!(lookup.get_str("from").unwrap(), "users");
        assert_eq!(lookup.get_str("localField").unwrap(), "userId");
        assert_eq!(lookup.get_str("foreignField").unwrap(), "_id");
    }

    #[test]
    fn test_resolve_paging_defaults_and_clamps() {
        let config = GamificationConfig::default();
        assert_eq!(resolve_paging(None, None, &config), (1, 25));
        assert_eq!(resolve_paging(Some(0), Some(0), &config), (1, 1));
        assert_eq!(resolve_paging(Some(3), Some(50), &config), (3, 50));
        assert_eq!(resolve_paging(Some(2), Some(10_000), &config), (2, 100));
    }

    #[test]
    fn test_entry_extraction_handles_i32_and_i64_scores() {
        let user_id = ObjectId::new();
        let doc = doc! {
            "userId": user_id,
            "score": 42_i32,
            "username": "ada",
            "displayName": "Ada",
            "lastActiveAt": bson::DateTime::now(),
        };
        let entry = entry_from_document(&doc, 7).unwrap();
        assert_eq!(entry.rank, 7);
        assert_eq!(entry.score, 42);
        assert_eq!(entry.user_id, user_id.to_hex());
        assert_eq!(entry.display_name.as_deref(), Some("Ada"));
        assert!(entry.last_active_at.is_some());

        let doc = doc! { "userId": ObjectId::new(), "score": 9_000_000_000_i64, "username": "g" };
        let entry = entry_from_document(&doc, 1).unwrap();
        assert_eq!(entry.score, 9_000_000_000);
        assert!(entry.last_active_at.is_none());
        assert!(entry.display_name.is_none());
    }

    #[test]
    fn test_entry_extraction_requires_user_id() {
        let doc = doc! { "score": 5, "username": "x" };
        assert!(entry_from_document(&doc, 1).is_err());
    }
}
