use anyhow::Context;
use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, oid::ObjectId, to_bson, Bson},
    options::ReturnDocument,
    Collection, Database,
};

use crate::events::{DashboardEvent, EventBroadcaster};
use crate::metrics::{LEVEL_UPS_TOTAL, XP_AWARDED_TOTAL};
use crate::models::gamification::{
    AwardXpOutcome, LevelHistoryEntry, UserGamification, XpSource,
};
use crate::models::user::User;
use crate::services::{xp, GamificationError};
use crate::utils::time::chrono_to_bson;

const COLLECTION: &str = "user_gamification";

/// Within-level progress for the profile widget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelProgress {
    /// XP earned past the current level's floor.
    pub xp_into_level: i64,
    /// XP between the current level's floor and the next level's floor.
    pub xp_for_next_level: i64,
    pub fraction: f64,
}

pub fn level_progress_parts(total_xp: i64, level: i32, base_xp: i64) -> LevelProgress {
    let floor = xp::xp_for_level(level, base_xp);
    let ceiling = xp::xp_for_level(level + 1, base_xp);
    let span = (ceiling - floor).max(1);
    let into = (total_xp - floor).clamp(0, span);

    LevelProgress {
        xp_into_level: into,
        xp_for_next_level: span,
        fraction: into as f64 / span as f64,
    }
}

/// Owns the "user_gamification" collection: XP totals, levels and unlock
/// records. All writes go through single-document atomic updates.
pub struct GamificationService {
    mongo: Database,
    events: EventBroadcaster,
    base_xp: i64,
}

impl GamificationService {
    pub fn new(mongo: Database, events: EventBroadcaster, base_xp: i64) -> Self {
        Self {
            mongo,
            events,
            base_xp,
        }
    }

    pub fn base_xp(&self) -> i64 {
        self.base_xp
    }

    fn collection(&self) -> Collection<UserGamification> {
        self.mongo.collection::<UserGamification>(COLLECTION)
    }

    /// Grant XP and reconcile the level with the new total.
    ///
    /// The increment is one atomic upsert. The level write afterwards is
    /// guarded by `currentLevel < new_level`, so concurrent awards can only
    /// move the level forward, never back.
    pub async fn award_xp(
        &self,
        user_id: ObjectId,
        amount: i64,
        source: XpSource,
        now: DateTime<Utc>,
    ) -> Result<AwardXpOutcome, GamificationError> {
        if amount < 0 {
            return Err(GamificationError::InvalidInput(
                "XP award cannot be negative".to_string(),
            ));
        }
        if amount == 0 {
            // Zero awards change no totals but still stamp the recency
            // timestamp that leaderboard tie-breaks read.
            let state = self
                .collection()
                .find_one_and_update(
                    doc! { "userId": user_id },
                    doc! {
                        "$set": {
                            "lastXpGainedAt": chrono_to_bson(now),
                            "updatedAt": chrono_to_bson(now),
                        },
                        "$setOnInsert": {
                            "totalXp": 0_i64,
                            "createdAt": chrono_to_bson(now),
                            "currentLevel": 1,
                            "unlockedBadges": [],
                            "levelHistory": [],
                        },
                    },
                )
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await
                .context("Failed to stamp zero XP award")?
                .context("Upsert returned no gamification document")?;
            return Ok(AwardXpOutcome {
                amount: 0,
                total_xp: state.total_xp,
                previous_level: state.current_level,
                new_level: state.current_level,
            });
        }

        let collection = self.collection();
        let update = doc! {
            "$inc": { "totalXp": amount },
            "$set": {
                "lastXpGainedAt": chrono_to_bson(now),
                "updatedAt": chrono_to_bson(now),
            },
            "$setOnInsert": {
                "createdAt": chrono_to_bson(now),
                "currentLevel": 1,
                "unlockedBadges": [],
                "levelHistory": [],
            },
        };

        let state = collection
            .find_one_and_update(doc! { "userId": user_id }, update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to award XP")?
            .context("Upsert returned no gamification document")?;

        let previous_level = state.current_level;
        let new_level = xp::level_for_xp(state.total_xp, self.base_xp);

        if new_level > previous_level {
            self.raise_level(user_id, previous_level, new_level, state.total_xp, now)
                .await?;
        }

        XP_AWARDED_TOTAL
            .with_label_values(&[source.as_str()])
            .inc_by(amount as u64);

        self.events.broadcast(DashboardEvent::XpAwarded {
            user_id: user_id.to_hex(),
            source,
            amount,
            total_xp: state.total_xp,
            current_level: new_level.max(previous_level),
        });

        Ok(AwardXpOutcome {
            amount,
            total_xp: state.total_xp,
            previous_level,
            new_level: new_level.max(previous_level),
        })
    }

    /// Record a level change, appending one history entry per crossed level.
    async fn raise_level(
        &self,
        user_id: ObjectId,
        from_level: i32,
        to_level: i32,
        total_xp: i64,
        now: DateTime<Utc>,
    ) -> Result<(), GamificationError> {
        let entries = (from_level + 1..=to_level)
            .map(|level| {
                to_bson(&LevelHistoryEntry {
                    level,
                    achieved_at: now,
                    xp_at_achievement: total_xp,
                })
            })
            .collect::<Result<Vec<Bson>, _>>()
            .context("Failed to encode level history")?;

        let result = self
            .collection()
            .update_one(
                doc! { "userId": user_id, "currentLevel": { "$lt": to_level } },
                doc! {
                    "$set": { "currentLevel": to_level, "updatedAt": chrono_to_bson(now) },
                    "$push": { "levelHistory": { "$each": entries } },
                },
            )
            .await
            .context("Failed to update level")?;

        // modified_count 0 means a concurrent award already moved the level
        // at least this far, and recorded its own history.
        if result.modified_count > 0 {
            LEVEL_UPS_TOTAL.inc_by((to_level - from_level) as u64);
            tracing::info!(
                user_id = %user_id,
                from_level,
                to_level,
                total_xp,
                "User leveled up"
            );
            self.events.broadcast(DashboardEvent::LevelUp {
                user_id: user_id.to_hex(),
                level: to_level,
                total_xp,
            });
        }

        Ok(())
    }

    pub async fn load(
        &self,
        user_id: ObjectId,
    ) -> Result<Option<UserGamification>, GamificationError> {
        let state = self
            .collection()
            .find_one(doc! { "userId": user_id })
            .await
            .context("Failed to load gamification state")?;
        Ok(state)
    }

    /// State for users who never earned XP: level 1, zero everything.
    pub async fn load_or_default(
        &self,
        user_id: ObjectId,
        now: DateTime<Utc>,
    ) -> Result<UserGamification, GamificationError> {
        Ok(self.load(user_id).await?.unwrap_or(UserGamification {
            id: None,
            user_id,
            total_xp: 0,
            current_level: 1,
            unlocked_badges: Vec::new(),
            level_history: Vec::new(),
            last_xp_gained_at: None,
            created_at: now,
            updated_at: now,
        }))
    }

    pub async fn find_user(&self, user_id: ObjectId) -> Result<Option<User>, GamificationError> {
        let user = self
            .mongo
            .collection::<User>("users")
            .find_one(doc! { "_id": user_id })
            .await
            .context("Failed to load user")?;
        Ok(user)
    }
}
