use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::gamification::XpSource;
use crate::models::progress::ActivityKind;

/// Bounded fan-out channel; slow SSE consumers lag and drop, they never
/// block the award path.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events pushed to live dashboard clients over /gamification/stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    ActivityRecorded {
        user_id: String,
        kind: ActivityKind,
        problem_id: String,
        xp_awarded: i64,
        total_xp: i64,
        current_level: i32,
    },
    XpAwarded {
        user_id: String,
        source: XpSource,
        amount: i64,
        total_xp: i64,
        current_level: i32,
    },
    LevelUp {
        user_id: String,
        level: i32,
        total_xp: i64,
    },
    BadgeUnlocked {
        user_id: String,
        badge_id: String,
        name: String,
        xp_reward: i64,
    },
    LeaderboardInvalidated {
        reason: String,
    },
}

impl DashboardEvent {
    /// SSE event name clients subscribe to with addEventListener.
    pub fn event_name(&self) -> &'static str {
        match self {
            DashboardEvent::ActivityRecorded { .. } => "activity_recorded",
            DashboardEvent::XpAwarded { .. } => "xp_awarded",
            DashboardEvent::LevelUp { .. } => "level_up",
            DashboardEvent::BadgeUnlocked { .. } => "badge_unlocked",
            DashboardEvent::LeaderboardInvalidated { .. } => "leaderboard_invalidated",
        }
    }

    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<DashboardEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Send to all current subscribers. A send error only means nobody is
    /// listening right now, which is fine.
    pub fn broadcast(&self, event: DashboardEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::debug!("No active dashboard subscribers: {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
