use mongodb::{Client as MongoClient, Database};
use thiserror::Error;

use crate::config::Config;
use crate::events::EventBroadcaster;
use crate::middlewares::rate_limit::RateLimiter;

pub mod badge_service;
pub mod gamification_service;
pub mod leaderboard_cache;
pub mod leaderboard_service;
pub mod progress_service;
pub mod xp;

use leaderboard_cache::LeaderboardCache;
use leaderboard_service::LeaderboardService;

/// Failures surfaced by the service layer. Handlers map these onto HTTP
/// statuses; anything without a dedicated status collapses into `Database`.
#[derive(Debug, Error)]
pub enum GamificationError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub events: EventBroadcaster,
    pub leaderboard_cache: LeaderboardCache,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wire up shared state. Does no IO: the Mongo driver connects lazily on
    /// first use, so construction cannot hang and the router can be built in
    /// tests without a database.
    pub fn new(config: Config, mongo_client: MongoClient) -> Self {
        let mongo = mongo_client.database(&config.mongo_database);
        let leaderboard_cache = LeaderboardCache::new(config.gamification.cache_ttl());

        Self {
            config,
            mongo,
            events: EventBroadcaster::new(),
            leaderboard_cache,
            rate_limiter: RateLimiter::new(),
        }
    }

    pub fn leaderboard_service(&self) -> LeaderboardService {
        LeaderboardService::new(self.mongo.clone(), self.leaderboard_cache.clone())
    }
}
