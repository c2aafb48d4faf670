use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::bson_datetime_as_chrono;

/// Badge definition stored in the "badges" collection.
///
/// Definitions are data, not code: admins add new badges at runtime and the
/// evaluator compares counters against `criteria` without redeploys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Badge {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub criteria: BadgeCriteria,
    #[serde(rename = "xpReward", default)]
    pub xp_reward: i64,
    #[serde(rename = "isActive", default = "default_is_active")]
    pub is_active: bool,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

fn default_is_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeCriteria {
    pub kind: CriteriaKind,
    pub threshold: i64,
}

/// Counter a badge threshold is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaKind {
    ProblemsSolved,
    StreakDays,
    XpEarned,
}

impl CriteriaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriteriaKind::ProblemsSolved => "problems_solved",
            CriteriaKind::StreakDays => "streak_days",
            CriteriaKind::XpEarned => "xp_earned",
        }
    }
}

/// Counters the evaluator matches criteria against. Streak badges use the
/// longest streak ever reached so a broken streak cannot re-lock a badge.
#[derive(Debug, Clone, Copy, Default)]
pub struct EligibilityCounters {
    pub problems_solved: i64,
    pub longest_streak: i64,
    pub total_xp: i64,
}

/// Badge as shown to a user: definition plus that user's unlock state.
#[derive(Debug, Serialize)]
pub struct BadgeState {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
    pub criteria: BadgeCriteria,
    pub xp_reward: i64,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub eligible: bool,
}

/// Result payload of POST /gamification/badges/{id}/claim.
#[derive(Debug, Serialize)]
pub struct ClaimBadgeResponse {
    pub badge_id: String,
    pub name: String,
    pub already_unlocked: bool,
    pub xp_awarded: i64,
    pub total_xp: i64,
    pub current_level: i32,
    pub leveled_up: bool,
}

/// Admin view of a badge definition.
#[derive(Debug, Serialize)]
pub struct BadgeView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
    pub criteria: BadgeCriteria,
    pub xp_reward: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Badge> for BadgeView {
    fn from(badge: Badge) -> Self {
        BadgeView {
            id: badge.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: badge.name,
            description: badge.description,
            icon: badge.icon,
            criteria: badge.criteria,
            xp_reward: badge.xp_reward,
            is_active: badge.is_active,
            created_at: badge.created_at,
            updated_at: badge.updated_at,
        }
    }
}

/// Body of POST /admin/badges.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBadgeRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,

    #[validate(length(
        min = 1,
        max = 500,
        message = "Description must be between 1 and 500 characters"
    ))]
    pub description: String,

    #[validate(length(max = 200, message = "Icon must be at most 200 characters"))]
    pub icon: Option<String>,

    pub criteria_kind: CriteriaKind,

    #[validate(range(min = 1, message = "Threshold must be at least 1"))]
    pub threshold: i64,

    #[validate(range(min = 0, message = "XP reward cannot be negative"))]
    #[serde(default)]
    pub xp_reward: i64,
}

/// Body of PATCH /admin/badges/{id}. Absent fields are left unchanged.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBadgeRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: Option<String>,

    #[validate(length(
        min = 1,
        max = 500,
        message = "Description must be between 1 and 500 characters"
    ))]
    pub description: Option<String>,

    #[validate(length(max = 200, message = "Icon must be at most 200 characters"))]
    pub icon: Option<String>,

    pub criteria_kind: Option<CriteriaKind>,

    #[validate(range(min = 1, message = "Threshold must be at least 1"))]
    pub threshold: Option<i64>,

    #[validate(range(min = 0, message = "XP reward cannot be negative"))]
    pub xp_reward: Option<i64>,

    pub is_active: Option<bool>,
}

/// Query params for badge listings.
#[derive(Debug, Default, Deserialize)]
pub struct ListBadgesQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{self, doc};

    #[test]
    fn test_criteria_kind_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&CriteriaKind::ProblemsSolved).unwrap(),
            "\"problems_solved\""
        );
        let parsed: CriteriaKind = serde_json::from_str("\"streak_days\"").unwrap();
        assert_eq!(parsed, CriteriaKind::StreakDays);
    }

    #[test]
    fn test_badge_document_field_names() {
        let badge = Badge {
            id: None,
            name: "Century".to_string(),
            description: "Solve 100 problems".to_string(),
            icon: None,
            criteria: BadgeCriteria {
                kind: CriteriaKind::ProblemsSolved,
                threshold: 100,
            },
            xp_reward: 500,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let doc = bson::to_document(&badge).unwrap();
        assert!(doc.contains_key("xpReward"));
        assert!(doc.contains_key("isActive"));
        assert_eq!(
            doc.get_document("criteria")
                .unwrap()
                .get_str("kind")
                .unwrap(),
            "problems_solved"
        );
    }

    #[test]
    fn test_deserialize_defaults() {
        let doc = doc! {
            "_id": ObjectId::new(),
            "name": "First Blood",
            "description": "Solve your first problem",
            "criteria": { "kind": "problems_solved", "threshold": 1_i64 },
            "createdAt": bson::DateTime::now(),
            "updatedAt": bson::DateTime::now(),
        };
        let badge: Badge = bson::from_document(doc).unwrap();
        assert!(badge.is_active);
        assert_eq!(badge.xp_reward, 0);
        assert!(badge.icon.is_none());
    }

    #[test]
    fn test_create_badge_request_validation() {
        let req = CreateBadgeRequest {
            name: "Streaker".to_string(),
            description: "Keep a 7 day streak".to_string(),
            icon: None,
            criteria_kind: CriteriaKind::StreakDays,
            threshold: 0,
            xp_reward: -5,
        };
        let err = validator::Validate::validate(&req).unwrap_err();
        assert!(err.field_errors().contains_key("threshold"));
        assert!(err.field_errors().contains_key("xp_reward"));
    }
}
