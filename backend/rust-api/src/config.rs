use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    #[serde(default)]
    pub gamification: GamificationConfig,
}

/// Tunables of the XP and leaderboard engine.
#[derive(Debug, Clone, Deserialize)]
pub struct GamificationConfig {
    /// Cost factor of the level curve: reaching level N takes base_xp * (N-1)^2.
    #[serde(default = "default_base_xp")]
    pub base_xp: i64,
    #[serde(default = "default_cache_ttl_secs")]
    pub leaderboard_cache_ttl_secs: u64,
    #[serde(default = "default_page_size")]
    pub leaderboard_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub leaderboard_max_page_size: u32,
}

fn default_base_xp() -> i64 {
    crate::services::xp::DEFAULT_BASE_XP
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_page_size() -> u32 {
    25
}

fn default_max_page_size() -> u32 {
    100
}

impl Default for GamificationConfig {
    fn default() -> Self {
        GamificationConfig {
            base_xp: default_base_xp(),
            leaderboard_cache_ttl_secs: default_cache_ttl_secs(),
            leaderboard_page_size: default_page_size(),
            leaderboard_max_page_size: default_max_page_size(),
        }
    }
}

impl GamificationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.leaderboard_cache_ttl_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            // Fallback to current directory .env for backward compatibility
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            // Load base config from TOML file
            .add_source(
                config::File::with_name(&format!("config/{}", env)).required(false), // Allow missing config file, fallback to ENV
            )
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        // Extract values with fallbacks to ENV or defaults
        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    panic!("FATAL: MONGO_URI must be set in production!");
                }
                eprintln!("WARNING: Using default MongoDB URI (dev mode only!)");
                "mongodb://localhost:27017".to_string()
            });

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "questcoder".to_string());

        let jwt_secret = settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    panic!("FATAL: JWT_SECRET must be set in production!");
                }
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            });

        let base_xp = settings
            .get_int("gamification.base_xp")
            .ok()
            .or_else(|| {
                env::var("GAMIFICATION_BASE_XP")
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .filter(|v| *v >= 1)
            .unwrap_or_else(default_base_xp);

        let leaderboard_cache_ttl_secs = settings
            .get_int("gamification.leaderboard_cache_ttl_secs")
            .ok()
            .or_else(|| {
                env::var("LEADERBOARD_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or_else(default_cache_ttl_secs);

        let leaderboard_page_size = settings
            .get_int("gamification.leaderboard_page_size")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v >= 1)
            .unwrap_or_else(default_page_size);

        let leaderboard_max_page_size = settings
            .get_int("gamification.leaderboard_max_page_size")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v >= leaderboard_page_size)
            .unwrap_or_else(default_max_page_size);

        Ok(Config {
            mongo_uri,
            mongo_database,
            jwt_secret,
            gamification: GamificationConfig {
                base_xp,
                leaderboard_cache_ttl_secs,
                leaderboard_page_size,
                leaderboard_max_page_size,
            },
        })
    }
}
