use anyhow::Context;
use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, oid::ObjectId, to_bson, Document},
    options::ReturnDocument,
    Collection, Database,
};
use futures::TryStreamExt;

use crate::events::{DashboardEvent, EventBroadcaster};
use crate::metrics::BADGES_UNLOCKED_TOTAL;
use crate::models::badge::{
    Badge, BadgeCriteria, BadgeState, ClaimBadgeResponse, CreateBadgeRequest, CriteriaKind,
    EligibilityCounters, UpdateBadgeRequest,
};
use crate::models::gamification::{AwardXpOutcome, UnlockedBadge, UserGamification, XpSource};
use crate::models::progress::UnlockedBadgeSummary;
use crate::services::gamification_service::GamificationService;
use crate::services::progress_service::ProgressService;
use crate::services::GamificationError;
use crate::utils::time::chrono_to_bson;

const COLLECTION: &str = "badges";
const GAMIFICATION_COLLECTION: &str = "user_gamification";

/// True when the user's counters satisfy the badge criteria.
pub fn criteria_met(criteria: &BadgeCriteria, counters: &EligibilityCounters) -> bool {
    let value = match criteria.kind {
        CriteriaKind::ProblemsSolved => counters.problems_solved,
        CriteriaKind::StreakDays => counters.longest_streak,
        CriteriaKind::XpEarned => counters.total_xp,
    };
    value >= criteria.threshold
}

/// New unlocks from one evaluation pass. `last_award` carries the XP state
/// after the final bonus so callers can report post-bonus totals.
pub struct BadgeEvaluation {
    pub unlocked: Vec<UnlockedBadgeSummary>,
    pub last_award: Option<AwardXpOutcome>,
}

/// Owns the "badges" catalog and the unlock records embedded in
/// "user_gamification".
pub struct BadgeService {
    mongo: Database,
    events: EventBroadcaster,
    base_xp: i64,
}

impl BadgeService {
    pub fn new(mongo: Database, events: EventBroadcaster, base_xp: i64) -> Self {
        Self {
            mongo,
            events,
            base_xp,
        }
    }

    fn collection(&self) -> Collection<Badge> {
        self.mongo.collection::<Badge>(COLLECTION)
    }

    fn gamification(&self) -> GamificationService {
        GamificationService::new(self.mongo.clone(), self.events.clone(), self.base_xp)
    }

    pub async fn list(&self, include_inactive: bool) -> Result<Vec<Badge>, GamificationError> {
        let filter = if include_inactive {
            doc! {}
        } else {
            doc! { "isActive": true }
        };
        let badges = self
            .collection()
            .find(filter)
            .sort(doc! { "createdAt": 1 })
            .await
            .context("Failed to query badges")?
            .try_collect::<Vec<_>>()
            .await
            .context("Failed to read badges")?;
        Ok(badges)
    }

    pub async fn find_by_id(&self, badge_id: ObjectId) -> Result<Option<Badge>, GamificationError> {
        let badge = self
            .collection()
            .find_one(doc! { "_id": badge_id })
            .await
            .context("Failed to load badge")?;
        Ok(badge)
    }

    /// Catalog of active badges with the user's unlock and eligibility state.
    pub async fn badge_states(
        &self,
        user_id: ObjectId,
        now: DateTime<Utc>,
    ) -> Result<Vec<BadgeState>, GamificationError> {
        let badges = self.list(false).await?;
        let gamification = self.gamification().load_or_default(user_id, now).await?;
        let counters = self.load_counters(user_id, &gamification).await?;

        let states = badges
            .into_iter()
            .map(|badge| {
                let id = badge.id.map(|id| id.to_hex()).unwrap_or_default();
                let unlocked_at = badge.id.and_then(|bid| {
                    gamification
                        .unlocked_badges
                        .iter()
                        .find(|u| u.badge_id == bid)
                        .map(|u| u.unlocked_at)
                });
                let eligible = unlocked_at.is_none() && criteria_met(&badge.criteria, &counters);
                BadgeState {
                    id,
                    name: badge.name,
                    description: badge.description,
                    icon: badge.icon,
                    criteria: badge.criteria,
                    xp_reward: badge.xp_reward,
                    unlocked: unlocked_at.is_some(),
                    unlocked_at,
                    eligible,
                }
            })
            .collect();
        Ok(states)
    }

    /// Unlock every active badge the counters now satisfy. Called after solve
    /// ingestion. Bonus XP from unlocks does not trigger a second pass;
    /// xp_earned badges crossed by a bonus are picked up on the next activity.
    pub async fn evaluate_and_unlock(
        &self,
        user_id: ObjectId,
        counters: EligibilityCounters,
        now: DateTime<Utc>,
    ) -> Result<BadgeEvaluation, GamificationError> {
        let badges = self.list(false).await?;
        let gamification = self.gamification().load_or_default(user_id, now).await?;

        let mut unlocked = Vec::new();
        let mut last_award = None;

        for badge in badges {
            let Some(badge_id) = badge.id else { continue };
            let already = gamification
                .unlocked_badges
                .iter()
                .any(|u| u.badge_id == badge_id);
            if already || !criteria_met(&badge.criteria, &counters) {
                continue;
            }

            // One failing badge must not block the rest of the pass.
            match self.unlock_with_bonus(user_id, badge_id, &badge, now).await {
                Ok(Some(award)) => {
                    if award.is_some() {
                        last_award = award;
                    }
                    unlocked.push(UnlockedBadgeSummary {
                        badge_id: badge_id.to_hex(),
                        name: badge.name,
                        xp_reward: badge.xp_reward,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(
                        user_id = %user_id,
                        badge_id = %badge_id,
                        error = %err,
                        "Badge unlock failed, continuing evaluation"
                    );
                }
            }
        }

        Ok(BadgeEvaluation {
            unlocked,
            last_award,
        })
    }

    /// Ok(None) when the badge was already held or lost a race; Ok(Some(_))
    /// on a fresh unlock, carrying the XP state after the bonus when the
    /// badge pays one.
    async fn unlock_with_bonus(
        &self,
        user_id: ObjectId,
        badge_id: ObjectId,
        badge: &Badge,
        now: DateTime<Utc>,
    ) -> Result<Option<Option<AwardXpOutcome>>, GamificationError> {
        if !self.try_unlock(user_id, badge_id, badge, now).await? {
            return Ok(None);
        }
        let bonus = if badge.xp_reward > 0 {
            Some(
                self.gamification()
                    .award_xp(user_id, badge.xp_reward, XpSource::Badge, now)
                    .await?,
            )
        } else {
            None
        };
        Ok(Some(bonus))
    }

    /// Explicit claim of a single badge. Idempotent: claiming an already
    /// unlocked badge reports `already_unlocked` and awards nothing.
    pub async fn claim(
        &self,
        user_id: ObjectId,
        badge_id: ObjectId,
        now: DateTime<Utc>,
    ) -> Result<ClaimBadgeResponse, GamificationError> {
        let badge = self
            .find_by_id(badge_id)
            .await?
            .filter(|b| b.is_active)
            .ok_or_else(|| GamificationError::NotFound("Badge not found".to_string()))?;

        let gamification = self.gamification().load_or_default(user_id, now).await?;
        let counters = self.load_counters(user_id, &gamification).await?;

        let already = gamification
            .unlocked_badges
            .iter()
            .any(|u| u.badge_id == badge_id);
        if !already && !criteria_met(&badge.criteria, &counters) {
            return Err(GamificationError::InvalidInput(
                "Badge criteria not met".to_string(),
            ));
        }

        let newly_unlocked =
            !already && self.try_unlock(user_id, badge_id, &badge, now).await?;

        if newly_unlocked {
            let (total_xp, current_level, leveled_up) = if badge.xp_reward > 0 {
                let award = self
                    .gamification()
                    .award_xp(user_id, badge.xp_reward, XpSource::Badge, now)
                    .await?;
                (award.total_xp, award.new_level, award.leveled_up())
            } else {
                let state = self.gamification().load_or_default(user_id, now).await?;
                (state.total_xp, state.current_level, false)
            };
            return Ok(ClaimBadgeResponse {
                badge_id: badge_id.to_hex(),
                name: badge.name,
                already_unlocked: false,
                xp_awarded: badge.xp_reward,
                total_xp,
                current_level,
                leveled_up,
            });
        }

        // Lost the race or previously unlocked: both inert.
        let state = self.gamification().load_or_default(user_id, now).await?;
        Ok(ClaimBadgeResponse {
            badge_id: badge_id.to_hex(),
            name: badge.name,
            already_unlocked: true,
            xp_awarded: 0,
            total_xp: state.total_xp,
            current_level: state.current_level,
            leveled_up: false,
        })
    }

    /// Append the unlock record unless it is already present. The filter
    /// excludes documents that hold the badge, so a concurrent duplicate
    /// claim matches nothing and modifies nothing.
    async fn try_unlock(
        &self,
        user_id: ObjectId,
        badge_id: ObjectId,
        badge: &Badge,
        now: DateTime<Utc>,
    ) -> Result<bool, GamificationError> {
        self.ensure_gamification_document(user_id, now).await?;

        let unlock = UnlockedBadge {
            badge_id,
            unlocked_at: now,
        };
        let result = self
            .mongo
            .collection::<UserGamification>(GAMIFICATION_COLLECTION)
            .update_one(
                doc! {
                    "userId": user_id,
                    "unlockedBadges.badgeId": { "$ne": badge_id },
                },
                doc! {
                    "$push": {
                        "unlockedBadges": to_bson(&unlock).context("Failed to encode unlock")?
                    },
                    "$set": { "updatedAt": chrono_to_bson(now) },
                },
            )
            .await
            .context("Failed to record badge unlock")?;

        let newly_unlocked = result.modified_count > 0;
        if newly_unlocked {
            BADGES_UNLOCKED_TOTAL
                .with_label_values(&[badge.criteria.kind.as_str()])
                .inc();
            tracing::info!(
                user_id = %user_id,
                badge_id = %badge_id,
                badge_name = %badge.name,
                "Badge unlocked"
            );
            self.events.broadcast(DashboardEvent::BadgeUnlocked {
                user_id: user_id.to_hex(),
                badge_id: badge_id.to_hex(),
                name: badge.name.clone(),
                xp_reward: badge.xp_reward,
            });
        }
        Ok(newly_unlocked)
    }

    /// Create-if-missing so the guarded unlock update has a document to hit.
    /// Must not use upsert together with the `$ne` guard: a non-matching
    /// filter would insert a duplicate document instead of no-opping.
    async fn ensure_gamification_document(
        &self,
        user_id: ObjectId,
        now: DateTime<Utc>,
    ) -> Result<(), GamificationError> {
        self.mongo
            .collection::<UserGamification>(GAMIFICATION_COLLECTION)
            .update_one(
                doc! { "userId": user_id },
                doc! {
                    "$setOnInsert": {
                        "totalXp": 0_i64,
                        "currentLevel": 1,
                        "unlockedBadges": [],
                        "levelHistory": [],
                        "createdAt": chrono_to_bson(now),
                        "updatedAt": chrono_to_bson(now),
                    },
                },
            )
            .upsert(true)
            .await
            .context("Failed to ensure gamification document")?;
        Ok(())
    }

    async fn load_counters(
        &self,
        user_id: ObjectId,
        gamification: &UserGamification,
    ) -> Result<EligibilityCounters, GamificationError> {
        let (problems, _current, longest) =
            ProgressService::new(self.mongo.clone()).load_counters(user_id).await?;
        Ok(EligibilityCounters {
            problems_solved: i64::from(problems),
            longest_streak: i64::from(longest),
            total_xp: gamification.total_xp,
        })
    }

    // Admin catalog operations

    pub async fn create(
        &self,
        request: CreateBadgeRequest,
        now: DateTime<Utc>,
    ) -> Result<Badge, GamificationError> {
        let existing = self
            .collection()
            .find_one(doc! { "name": &request.name })
            .await
            .context("Failed to check badge name")?;
        if existing.is_some() {
            return Err(GamificationError::InvalidInput(format!(
                "Badge named '{}' already exists",
                request.name
            )));
        }

        let mut badge = Badge {
            id: None,
            name: request.name,
            description: request.description,
            icon: request.icon,
            criteria: BadgeCriteria {
                kind: request.criteria_kind,
                threshold: request.threshold,
            },
            xp_reward: request.xp_reward,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .collection()
            .insert_one(&badge)
            .await
            .context("Failed to insert badge")?;
        badge.id = inserted.inserted_id.as_object_id();

        tracing::info!(badge_name = %badge.name, "Badge created");
        Ok(badge)
    }

    pub async fn update(
        &self,
        badge_id: ObjectId,
        request: UpdateBadgeRequest,
        now: DateTime<Utc>,
    ) -> Result<Badge, GamificationError> {
        let mut set_doc = Document::new();
        if let Some(name) = request.name {
            set_doc.insert("name", name);
        }
        if let Some(description) = request.description {
            set_doc.insert("description", description);
        }
        if let Some(icon) = request.icon {
            set_doc.insert("icon", icon);
        }
        if let Some(kind) = request.criteria_kind {
            set_doc.insert("criteria.kind", kind.as_str());
        }
        if let Some(threshold) = request.threshold {
            set_doc.insert("criteria.threshold", threshold);
        }
        if let Some(xp_reward) = request.xp_reward {
            set_doc.insert("xpReward", xp_reward);
        }
        if let Some(is_active) = request.is_active {
            set_doc.insert("isActive", is_active);
        }
        set_doc.insert("updatedAt", chrono_to_bson(now));

        let badge = self
            .collection()
            .find_one_and_update(doc! { "_id": badge_id }, doc! { "$set": set_doc })
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to update badge")?
            .ok_or_else(|| GamificationError::NotFound("Badge not found".to_string()))?;
        Ok(badge)
    }

    /// Soft delete: unlock records referencing the badge stay valid, the
    /// badge just stops being listed and claimable.
    pub async fn deactivate(
        &self,
        badge_id: ObjectId,
        now: DateTime<Utc>,
    ) -> Result<(), GamificationError> {
        let result = self
            .collection()
            .update_one(
                doc! { "_id": badge_id },
                doc! { "$set": { "isActive": false, "updatedAt": chrono_to_bson(now) } },
            )
            .await
            .context("Failed to deactivate badge")?;

        if result.matched_count == 0 {
            return Err(GamificationError::NotFound("Badge not found".to_string()));
        }
        tracing::info!(badge_id = %badge_id, "Badge deactivated");
        Ok(())
    }
}
