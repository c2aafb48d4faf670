use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which counter a leaderboard ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardKind {
    Xp,
    Problems,
    Streak,
}

impl BoardKind {
    pub fn parse(s: &str) -> Option<BoardKind> {
        match s {
            "xp" => Some(BoardKind::Xp),
            "problems" => Some(BoardKind::Problems),
            "streak" => Some(BoardKind::Streak),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BoardKind::Xp => "xp",
            BoardKind::Problems => "problems",
            BoardKind::Streak => "streak",
        }
    }
}

/// Optional recency filter. Users whose relevant activity timestamp falls
/// outside the window are excluded; scores stay lifetime totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Day,
    Week,
    Month,
}

impl TimeWindow {
    pub fn parse(s: &str) -> Option<TimeWindow> {
        match s {
            "day" => Some(TimeWindow::Day),
            "week" => Some(TimeWindow::Week),
            "month" => Some(TimeWindow::Month),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
        }
    }

    pub fn start_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeWindow::Day => now - Duration::days(1),
            TimeWindow::Week => now - Duration::days(7),
            TimeWindow::Month => now - Duration::days(30),
        }
    }
}

/// Query params for GET /gamification/leaderboard.
#[derive(Debug, Default, Deserialize)]
pub struct LeaderboardQuery {
    pub board: Option<String>,
    pub window: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Query params for GET /gamification/users/{id}/rank.
#[derive(Debug, Default, Deserialize)]
pub struct RankQuery {
    pub board: Option<String>,
    pub window: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub score: i64,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// One page of a ranked board. Cached whole, so it must stay cheap to clone.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardPage {
    pub board: BoardKind,
    pub window: Option<TimeWindow>,
    pub page: u32,
    pub limit: u32,
    pub total_participants: u64,
    pub entries: Vec<LeaderboardEntry>,
}

/// Result payload of GET /gamification/users/{id}/rank.
#[derive(Debug, Clone, Serialize)]
pub struct RankView {
    pub user_id: String,
    pub board: BoardKind,
    pub window: Option<TimeWindow>,
    /// None when the user has no counted activity on this board.
    pub rank: Option<u64>,
    pub score: i64,
    pub total_participants: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_board_kind_parse() {
        assert_eq!(BoardKind::parse("xp"), Some(BoardKind::Xp));
        assert_eq!(BoardKind::parse("problems"), Some(BoardKind::Problems));
        assert_eq!(BoardKind::parse("streak"), Some(BoardKind::Streak));
        assert_eq!(BoardKind::parse("XP"), None);
        assert_eq!(BoardKind::parse("points"), None);
    }

    #[test]
    fn test_window_parse() {
        assert_eq!(TimeWindow::parse("day"), Some(TimeWindow::Day));
        assert_eq!(TimeWindow::parse("week"), Some(TimeWindow::Week));
        assert_eq!(TimeWindow::parse("month"), Some(TimeWindow::Month));
        assert_eq!(TimeWindow::parse("year"), None);
    }

    #[test]
    fn test_window_start_from() {
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
        assert_eq!(
            TimeWindow::Day.start_from(now),
            Utc.with_ymd_and_hms(2024, 5, 14, 12, 0, 0).unwrap()
        );
        assert_eq!(
            TimeWindow::Week.start_from(now),
            Utc.with_ymd_and_hms(2024, 5, 8, 12, 0, 0).unwrap()
        );
        assert_eq!(
            TimeWindow::Month.start_from(now),
            Utc.with_ymd_and_hms(2024, 4, 15, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_board_serializes_as_snake_case() {
        let page = LeaderboardPage {
            board: BoardKind::Problems,
            window: Some(TimeWindow::Week),
            page: 1,
            limit: 25,
            total_participants: 0,
            entries: vec![],
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["board"], "problems");
        assert_eq!(json["window"], "week");
    }
}
