use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::metrics::{record_cache_hit, record_cache_miss, CACHE_INVALIDATIONS_TOTAL};
use crate::models::leaderboard::{BoardKind, LeaderboardPage, TimeWindow};

/// Key of one cached page: board, window, page number and page size.
/// Two requests with the same signature are interchangeable.
pub fn cache_signature(
    board: BoardKind,
    window: Option<TimeWindow>,
    page: u32,
    limit: u32,
) -> String {
    format!(
        "{}:{}:{}:{}",
        board.as_str(),
        window.map(|w| w.as_str()).unwrap_or("all"),
        page,
        limit
    )
}

struct CachedPage {
    stored_at: Instant,
    page: LeaderboardPage,
}

/// In-process TTL cache for computed leaderboard pages.
///
/// Entries expire after `ttl` and the whole map is cleared after any
/// XP-affecting write, so a page is never older than the TTL and never
/// survives a known score change. Clones share the same map.
#[derive(Clone)]
pub struct LeaderboardCache {
    entries: Arc<DashMap<String, CachedPage>>,
    ttl: Duration,
}

impl LeaderboardCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<LeaderboardPage> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.stored_at.elapsed() < self.ttl {
                    record_cache_hit();
                    return Some(entry.page.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        record_cache_miss();
        None
    }

    pub fn insert(&self, key: String, page: LeaderboardPage) {
        self.entries.insert(
            key,
            CachedPage {
                stored_at: Instant::now(),
                page,
            },
        );
    }

    /// Drop every cached page. Called after writes that can move scores;
    /// clearing everything beats tracking which signatures a write touched.
    pub fn invalidate_all(&self, reason: &str) {
        self.entries.clear();
        CACHE_INVALIDATIONS_TOTAL.with_label_values(&[reason]).inc();
        tracing::debug!(reason = reason, "Leaderboard cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
