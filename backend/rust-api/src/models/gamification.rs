use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::badge::BadgeState;
use super::progress::ActivityItem;
use super::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

/// Per-user gamification state stored in the "user_gamification" collection.
///
/// Created lazily on the first XP award; a user with no document is treated
/// as level 1 with zero XP everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGamification {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(rename = "userId")]
    pub user_id: ObjectId,
    #[serde(rename = "totalXp", default)]
    pub total_xp: i64,
    #[serde(rename = "currentLevel", default = "default_level")]
    pub current_level: i32,
    #[serde(rename = "unlockedBadges", default)]
    pub unlocked_badges: Vec<UnlockedBadge>,
    #[serde(rename = "levelHistory", default)]
    pub level_history: Vec<LevelHistoryEntry>,
    #[serde(
        rename = "lastXpGainedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub last_xp_gained_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

fn default_level() -> i32 {
    1
}

/// Embedded record of a single badge unlock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockedBadge {
    #[serde(rename = "badgeId")]
    pub badge_id: ObjectId,
    #[serde(rename = "unlockedAt", with = "bson_datetime_as_chrono")]
    pub unlocked_at: DateTime<Utc>,
}

/// Embedded record appended once per level crossed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelHistoryEntry {
    pub level: i32,
    #[serde(rename = "achievedAt", with = "bson_datetime_as_chrono")]
    pub achieved_at: DateTime<Utc>,
    #[serde(rename = "xpAtAchievement")]
    pub xp_at_achievement: i64,
}

/// Why XP was granted. Used for metrics labels and push events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XpSource {
    Solve,
    Badge,
}

impl XpSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            XpSource::Solve => "solve",
            XpSource::Badge => "badge",
        }
    }
}

/// Result of a single XP award against the gamification document.
#[derive(Debug, Clone)]
pub struct AwardXpOutcome {
    pub amount: i64,
    pub total_xp: i64,
    pub previous_level: i32,
    pub new_level: i32,
}

impl AwardXpOutcome {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.previous_level
    }
}

/// Full profile snapshot returned by GET /gamification/profile.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub total_xp: i64,
    pub current_level: i32,
    pub xp_into_level: i64,
    pub xp_for_next_level: i64,
    pub level_progress: f64,
    pub problems_solved: i32,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_xp_gained_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub badges: Vec<BadgeState>,
    pub level_history: Vec<LevelHistoryItem>,
    pub recent_activity: Vec<ActivityItem>,
}

/// API projection of [`LevelHistoryEntry`] with RFC 3339 timestamps.
#[derive(Debug, Serialize)]
pub struct LevelHistoryItem {
    pub level: i32,
    pub achieved_at: DateTime<Utc>,
    pub xp_at_achievement: i64,
}

impl From<LevelHistoryEntry> for LevelHistoryItem {
    fn from(entry: LevelHistoryEntry) -> Self {
        LevelHistoryItem {
            level: entry.level,
            achieved_at: entry.achieved_at,
            xp_at_achievement: entry.xp_at_achievement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{self, doc};

    #[test]
    fn test_deserialize_minimal_document() {
        let doc = doc! {
            "userId": ObjectId::new(),
            "createdAt": bson::DateTime::now(),
            "updatedAt": bson::DateTime::now(),
        };
        let state: UserGamification = bson::from_document(doc).unwrap();
        assert_eq!(state.total_xp, 0);
        assert_eq!(state.current_level, 1);
        assert!(state.unlocked_badges.is_empty());
        assert!(state.level_history.is_empty());
        assert!(state.last_xp_gained_at.is_none());
    }

    #[test]
    fn test_serialize_uses_mongo_field_names() {
        let state = UserGamification {
            id: None,
            user_id: ObjectId::new(),
            total_xp: 250,
            current_level: 2,
            unlocked_badges: vec![],
            level_history: vec![],
            last_xp_gained_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let doc = bson::to_document(&state).unwrap();
        assert!(doc.contains_key("totalXp"));
        assert!(doc.contains_key("currentLevel"));
        assert!(!doc.contains_key("total_xp"));
    }

    #[test]
    fn test_leveled_up() {
        let outcome = AwardXpOutcome {
            amount: 50,
            total_xp: 120,
            previous_level: 1,
            new_level: 2,
        };
        assert!(outcome.leveled_up());

        let flat = AwardXpOutcome {
            amount: 10,
            total_xp: 30,
            previous_level: 1,
            new_level: 1,
        };
        assert!(!flat.leveled_up());
    }
}
