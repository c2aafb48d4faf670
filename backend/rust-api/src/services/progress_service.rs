use anyhow::Context;
use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, oid::ObjectId, to_bson, Document},
    Collection, Database,
};

use crate::models::progress::{ActivityEvent, ActivityKind, RecordActivityRequest, UserProgress};
use crate::services::GamificationError;
use crate::utils::time::{chrono_to_bson, utc_day_number};

const COLLECTION: &str = "user_progress";

/// Streak counters after folding in one solve day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakUpdate {
    pub current: i32,
    pub longest: i32,
    pub last_solve_day: i64,
}

/// Fold a solve on `solve_day` into the streak counters.
///
/// Rules, all in UTC days: the day after the last solve extends the streak,
/// the same day leaves it unchanged, a gap longer than one day restarts at 1.
/// A day earlier than the stored one is a late-arriving event and changes
/// nothing except the longest-streak ratchet.
pub fn apply_solve_day(
    current: i32,
    longest: i32,
    last_solve_day: Option<i64>,
    solve_day: i64,
) -> StreakUpdate {
    let (new_current, new_last) = match last_solve_day {
        None => (1, solve_day),
        Some(prev) if solve_day == prev + 1 => (current + 1, solve_day),
        Some(prev) if solve_day == prev => (current.max(1), prev),
        Some(prev) if solve_day > prev => (1, solve_day),
        // solve_day < prev: out-of-order delivery
        Some(prev) => (current, prev),
    };

    StreakUpdate {
        current: new_current,
        longest: longest.max(new_current),
        last_solve_day: new_last,
    }
}

/// Owns the "user_progress" collection: the append-only activity log and the
/// counters derived from it.
pub struct ProgressService {
    mongo: Database,
}

impl ProgressService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn collection(&self) -> Collection<UserProgress> {
        self.mongo.collection::<UserProgress>(COLLECTION)
    }

    /// Append one activity event and update the derived counters.
    ///
    /// Returns the post-update state so callers can compute the XP reward
    /// from the streak the solve just produced.
    pub async fn record(
        &self,
        user_id: ObjectId,
        request: &RecordActivityRequest,
        now: DateTime<Utc>,
    ) -> Result<UserProgress, GamificationError> {
        let collection = self.collection();

        let mut progress = collection
            .find_one(doc! { "userId": user_id })
            .await
            .context("Failed to load user progress")?
            .unwrap_or_else(|| UserProgress::empty(user_id, now));

        let occurred_at = request.occurred_at.unwrap_or(now);
        let event = ActivityEvent {
            kind: request.kind,
            problem_id: request.problem_id.clone(),
            platform: request.platform.clone(),
            difficulty: request.difficulty,
            occurred_at,
        };

        match request.kind {
            ActivityKind::Solved => {
                progress.problems_solved += 1;
                let update = apply_solve_day(
                    progress.current_streak,
                    progress.longest_streak,
                    progress.last_solve_day,
                    utc_day_number(occurred_at),
                );
                progress.current_streak = update.current;
                progress.longest_streak = update.longest;
                progress.last_solve_day = Some(update.last_solve_day);
            }
            ActivityKind::Unsolved => {
                // Marking a problem back to unsolved takes the count down but
                // never rewrites streak history.
                progress.problems_solved = (progress.problems_solved - 1).max(0);
            }
        }

        progress.last_activity_at = Some(match progress.last_activity_at {
            Some(prev) if prev > occurred_at => prev,
            _ => occurred_at,
        });
        progress.updated_at = now;

        let mut set_doc = doc! {
            "problemsSolved": progress.problems_solved,
            "currentStreak": progress.current_streak,
            "longestStreak": progress.longest_streak,
            "updatedAt": chrono_to_bson(now),
        };
        if let Some(last_activity) = progress.last_activity_at {
            set_doc.insert("lastActivityAt", chrono_to_bson(last_activity));
        }
        if let Some(day) = progress.last_solve_day {
            set_doc.insert("lastSolveDay", day);
        }

        let update = doc! {
            "$push": { "activityLog": to_bson(&event).context("Failed to encode activity event")? },
            "$set": set_doc,
            "$setOnInsert": { "createdAt": chrono_to_bson(progress.created_at) },
        };

        collection
            .update_one(doc! { "userId": user_id }, update)
            .upsert(true)
            .await
            .context("Failed to persist user progress")?;

        progress.activity_log.push(event);
        Ok(progress)
    }

    /// Current counters, or an empty state for users with no recorded activity.
    pub async fn load(
        &self,
        user_id: ObjectId,
        now: DateTime<Utc>,
    ) -> Result<UserProgress, GamificationError> {
        let progress = self
            .collection()
            .find_one(doc! { "userId": user_id })
            .await
            .context("Failed to load user progress")?
            .unwrap_or_else(|| UserProgress::empty(user_id, now));
        Ok(progress)
    }

    /// Counters only, skipping the activity log. Used by the badge evaluator
    /// where the full log would be wasted bandwidth.
    pub async fn load_counters(
        &self,
        user_id: ObjectId,
    ) -> Result<(i32, i32, i32), GamificationError> {
        let collection = self.mongo.collection::<Document>(COLLECTION);
        let doc = collection
            .find_one(doc! { "userId": user_id })
            .projection(doc! { "problemsSolved": 1, "currentStreak": 1, "longestStreak": 1 })
            .await
            .context("Failed to load progress counters")?;

        let Some(doc) = doc else {
            return Ok((0, 0, 0));
        };

        let problems = doc.get_i32("problemsSolved").unwrap_or(0);
        let current = doc.get_i32("currentStreak").unwrap_or(0);
        let longest = doc.get_i32("longestStreak").unwrap_or(0);
        Ok((problems, current, longest))
    }
}
