use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

/// Solve history and streak counters stored in the "user_progress" collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProgress {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(rename = "userId")]
    pub user_id: ObjectId,
    #[serde(rename = "activityLog", default)]
    pub activity_log: Vec<ActivityEvent>,
    #[serde(rename = "problemsSolved", default)]
    pub problems_solved: i32,
    #[serde(rename = "currentStreak", default)]
    pub current_streak: i32,
    #[serde(rename = "longestStreak", default)]
    pub longest_streak: i32,
    /// UTC day number of the most recent solve, see `utils::time::utc_day_number`.
    #[serde(rename = "lastSolveDay", default, skip_serializing_if = "Option::is_none")]
    pub last_solve_day: Option<i64>,
    #[serde(
        rename = "lastActivityAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl UserProgress {
    pub fn empty(user_id: ObjectId, now: DateTime<Utc>) -> Self {
        UserProgress {
            id: None,
            user_id,
            activity_log: Vec::new(),
            problems_solved: 0,
            current_streak: 0,
            longest_streak: 0,
            last_solve_day: None,
            last_activity_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One append-only entry in the activity log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    #[serde(rename = "problemId")]
    pub problem_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub difficulty: Difficulty,
    #[serde(rename = "occurredAt", with = "bson_datetime_as_chrono")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Solved,
    Unsolved,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Solved => "solved",
            ActivityKind::Unsolved => "unsolved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// Body of POST /gamification/activity.
#[derive(Debug, Deserialize, Validate)]
pub struct RecordActivityRequest {
    pub kind: ActivityKind,

    #[validate(length(min = 1, max = 200, message = "problem_id must be 1-200 characters"))]
    pub problem_id: String,

    #[validate(length(min = 1, max = 50, message = "platform must be 1-50 characters"))]
    pub platform: Option<String>,

    pub difficulty: Difficulty,

    /// Defaults to the server clock when omitted.
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Result payload of POST /gamification/activity.
#[derive(Debug, Serialize)]
pub struct RecordActivityResponse {
    pub kind: ActivityKind,
    pub problem_id: String,
    pub xp_awarded: i64,
    pub total_xp: i64,
    pub current_level: i32,
    pub leveled_up: bool,
    pub problems_solved: i32,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub unlocked_badges: Vec<UnlockedBadgeSummary>,
}

/// Badge granted as a side effect of recording activity.
#[derive(Debug, Serialize)]
pub struct UnlockedBadgeSummary {
    pub badge_id: String,
    pub name: String,
    pub xp_reward: i64,
}

/// API projection of [`ActivityEvent`] with RFC 3339 timestamps.
#[derive(Debug, Serialize)]
pub struct ActivityItem {
    pub kind: ActivityKind,
    pub problem_id: String,
    pub platform: Option<String>,
    pub difficulty: Difficulty,
    pub occurred_at: DateTime<Utc>,
}

impl From<ActivityEvent> for ActivityItem {
    fn from(event: ActivityEvent) -> Self {
        ActivityItem {
            kind: event.kind,
            problem_id: event.problem_id,
            platform: event.platform,
            difficulty: event.difficulty,
            occurred_at: event.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{self, doc};

    #[test]
    fn test_difficulty_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Difficulty::Easy).unwrap(), "\"easy\"");
        let parsed: Difficulty = serde_json::from_str("\"hard\"").unwrap();
        assert_eq!(parsed, Difficulty::Hard);
    }

    #[test]
    fn test_activity_kind_rejects_unknown() {
        let parsed: Result<ActivityKind, _> = serde_json::from_str("\"skipped\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_deserialize_legacy_document_without_counters() {
        let doc = doc! {
            "userId": ObjectId::new(),
            "createdAt": bson::DateTime::now(),
            "updatedAt": bson::DateTime::now(),
        };
        let progress: UserProgress = bson::from_document(doc).unwrap();
        assert_eq!(progress.problems_solved, 0);
        assert_eq!(progress.current_streak, 0);
        assert!(progress.last_solve_day.is_none());
        assert!(progress.activity_log.is_empty());
    }

    #[test]
    fn test_activity_event_roundtrip_keeps_field_names() {
        let event = ActivityEvent {
            kind: ActivityKind::Solved,
            problem_id: "two-sum".to_string(),
            platform: Some("leetcode".to_string()),
            difficulty: Difficulty::Medium,
            occurred_at: Utc::now(),
        };
        let doc = bson::to_document(&event).unwrap();
        assert!(doc.contains_key("problemId"));
        assert!(doc.contains_key("occurredAt"));
        assert_eq!(doc.get_str("kind").unwrap(), "solved");
    }

    #[test]
    fn test_validate_record_activity_request() {
        let req = RecordActivityRequest {
            kind: ActivityKind::Solved,
            problem_id: String::new(),
            platform: None,
            difficulty: Difficulty::Easy,
            occurred_at: None,
        };
        assert!(validator::Validate::validate(&req).is_err());

        let req = RecordActivityRequest {
            problem_id: "valid-anagram".to_string(),
            ..req
        };
        assert!(validator::Validate::validate(&req).is_ok());
    }
}
