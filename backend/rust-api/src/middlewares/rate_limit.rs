use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::handlers::ApiError;
use crate::services::AppState;

const RATE_LIMIT_PER_USER: u32 = 100; // requests per minute
const RATE_LIMIT_PER_IP: u32 = 200; // requests per minute
const RATE_WINDOW_SECONDS: u64 = 60;

const ADMIN_RATE_LIMIT_PER_USER: u32 = 200;
const ADMIN_RATE_LIMIT_PER_IP: u32 = 300;
const ADMIN_RATE_WINDOW_SECONDS: u64 = 60;

// Expired windows are swept once per this many checks.
const SWEEP_EVERY: usize = 1024;

struct Window {
    started_at: Instant,
    window: Duration,
    count: u32,
}

/// Fixed-window request counters held in process.
///
/// The service is single-process, so there is no shared store to coordinate
/// with; a concurrent map of per-key windows is enough. Windows reset lazily
/// on the first request after expiry. IP keys come from client-controlled
/// headers, so expired entries are also evicted on an amortized sweep —
/// without it, spoofed addresses would grow the map without bound.
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    checks: AtomicUsize,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
            checks: AtomicUsize::new(0),
        }
    }

    /// Count one request against `key`. Returns false once `limit` requests
    /// have landed inside the current window.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> bool {
        let allowed = {
            let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
                started_at: Instant::now(),
                window,
                count: 0,
            });

            if entry.started_at.elapsed() >= entry.window {
                entry.started_at = Instant::now();
                entry.window = window;
                entry.count = 0;
            }

            if entry.count >= limit {
                false
            } else {
                entry.count += 1;
                true
            }
        };

        // Entry guard dropped above: retain locks the same shards.
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep();
        }
        allowed
    }

    /// Drop every window whose period has elapsed. A live key that comes
    /// back after a sweep just starts a fresh window.
    fn sweep(&self) {
        self.windows.retain(|_, w| w.started_at.elapsed() < w.window);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_client_ip_from(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    // Preferred order: X-Forwarded-For, Forwarded, X-Real-IP, ConnectInfo
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            // x-forwarded-for can be a comma separated list; take first
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("forwarded") {
        if let Ok(s) = v.to_str() {
            // forwarded: for=1.2.3.4; proto=http; by=...
            for part in s.split(';') {
                let p = part.trim();
                if p.starts_with("for=") {
                    let val = p.trim_start_matches("for=").trim().trim_matches('\"');
                    return val.to_string();
                }
            }
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    // Fall back to ConnectInfo socket address if available
    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

fn env_limit(var: &str, default: u32) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}

fn rate_limit_disabled() -> bool {
    std::env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1"
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if rate_limit_disabled() {
        tracing::debug!("Rate limiting disabled via RATE_LIMIT_DISABLED=1");
        return Ok(next.run(request).await);
    }

    let client_ip = extract_client_ip_from(request.headers(), request.extensions());
    let user_id = request
        .extensions()
        .get::<super::auth::JwtClaims>()
        .map(|claims| claims.sub.clone());
    let window = Duration::from_secs(RATE_WINDOW_SECONDS);

    if let Some(uid) = &user_id {
        let user_limit = env_limit("RATE_LIMIT_PER_USER", RATE_LIMIT_PER_USER);
        if !state
            .rate_limiter
            .check(&format!("ratelimit:user:{}", uid), user_limit, window)
        {
            tracing::warn!("Rate limit exceeded for user: {}", uid);
            return Err(ApiError::too_many_requests("Too many requests"));
        }
    }

    let ip_limit = env_limit("RATE_LIMIT_PER_IP", RATE_LIMIT_PER_IP);
    if !state
        .rate_limiter
        .check(&format!("ratelimit:ip:{}", client_ip), ip_limit, window)
    {
        tracing::warn!("Rate limit exceeded for IP: {}", client_ip);
        return Err(ApiError::too_many_requests("Too many requests"));
    }

    Ok(next.run(request).await)
}

pub async fn admin_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if std::env::var("ADMIN_RATE_LIMIT_DISABLED").unwrap_or_default() == "1" || rate_limit_disabled()
    {
        return Ok(next.run(request).await);
    }

    let client_ip = extract_client_ip_from(request.headers(), request.extensions());
    let user_id = request
        .extensions()
        .get::<super::auth::JwtClaims>()
        .map(|c| c.sub.clone());
    let window = Duration::from_secs(ADMIN_RATE_WINDOW_SECONDS);

    if let Some(uid) = &user_id {
        let limit = env_limit("ADMIN_RATE_LIMIT_PER_USER", ADMIN_RATE_LIMIT_PER_USER);
        if !state
            .rate_limiter
            .check(&format!("ratelimit:admin:user:{uid}"), limit, window)
        {
            tracing::warn!("Admin user rate limit exceeded: {uid}");
            return Err(ApiError::too_many_requests("Too many requests"));
        }
    }

    let ip_limit = env_limit("ADMIN_RATE_LIMIT_PER_IP", ADMIN_RATE_LIMIT_PER_IP);
    if !state
        .rate_limiter
        .check(&format!("ratelimit:admin:ip:{client_ip}"), ip_limit, window)
    {
        tracing::warn!("Admin IP rate limit exceeded: {client_ip}");
        return Err(ApiError::too_many_requests("Too many requests"));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ConnectInfo;
    use axum::http::HeaderMap;
    use std::net::SocketAddr;

    #[test]
    fn test_extract_client_ip_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
        let exts = axum::http::Extensions::new();
        assert_eq!(
            extract_client_ip_from(&headers, &exts),
            "1.2.3.4".to_string()
        );
    }

    #[test]
    fn test_extract_client_ip_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert("forwarded", "for=5.6.7.8;proto=http".parse().unwrap());
        let exts = axum::http::Extensions::new();
        assert_eq!(
            extract_client_ip_from(&headers, &exts),
            "5.6.7.8".to_string()
        );
    }

    #[test]
    fn test_extract_client_ip_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());
        let exts = axum::http::Extensions::new();
        assert_eq!(
            extract_client_ip_from(&headers, &exts),
            "9.9.9.9".to_string()
        );
    }

    #[test]
    fn test_extract_client_ip_connectinfo() {
        let headers = HeaderMap::new();
        let mut exts = axum::http::Extensions::new();
        exts.insert(ConnectInfo::<SocketAddr>("7.7.7.7:1234".parse().unwrap()));
        assert_eq!(
            extract_client_ip_from(&headers, &exts),
            "7.7.7.7".to_string()
        );
    }

    #[test]
    fn test_window_blocks_at_limit() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);
        assert!(limiter.check("ratelimit:user:a", 2, window));
        assert!(limiter.check("ratelimit:user:a", 2, window));
        assert!(!limiter.check("ratelimit:user:a", 2, window));
    }

    #[test]
    fn test_windows_are_independent_per_key() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);
        assert!(limiter.check("ratelimit:user:a", 1, window));
        assert!(!limiter.check("ratelimit:user:a", 1, window));
        assert!(limiter.check("ratelimit:user:b", 1, window));
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let limiter = RateLimiter::new();
        let window = Duration::from_millis(20);
        assert!(limiter.check("ratelimit:ip:1.2.3.4", 1, window));
        assert!(!limiter.check("ratelimit:ip:1.2.3.4", 1, window));
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check("ratelimit:ip:1.2.3.4", 1, window));
    }

    #[test]
    fn test_sweep_drops_expired_windows() {
        let limiter = RateLimiter::new();
        let window = Duration::from_millis(10);
        for i in 0..1000 {
            limiter.check(&format!("ratelimit:ip:10.0.0.{i}"), 5, window);
        }
        assert_eq!(limiter.windows.len(), 1000);

        std::thread::sleep(Duration::from_millis(50));
        limiter.check("ratelimit:ip:fresh", 5, window);
        limiter.sweep();

        assert_eq!(limiter.windows.len(), 1);
        assert!(limiter.windows.contains_key("ratelimit:ip:fresh"));
    }

    #[test]
    fn test_sweep_keeps_live_windows() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("ratelimit:user:a", 5, Duration::from_secs(60)));
        limiter.sweep();
        assert_eq!(limiter.windows.len(), 1);
        // Counts survive a sweep while the window is live.
        assert!(limiter.check("ratelimit:user:a", 2, Duration::from_secs(60)));
        assert!(!limiter.check("ratelimit:user:a", 2, Duration::from_secs(60)));
    }

    #[test]
    fn test_check_sweeps_periodically() {
        let limiter = RateLimiter::new();
        let window = Duration::from_millis(10);
        for i in 0..(SWEEP_EVERY - 1) {
            limiter.check(&format!("ratelimit:ip:spoofed-{i}"), 5, window);
        }
        std::thread::sleep(Duration::from_millis(50));

        // The next check crosses the sweep threshold and evicts the rest.
        limiter.check("ratelimit:ip:fresh", 5, window);
        assert_eq!(limiter.windows.len(), 1);
    }
}
