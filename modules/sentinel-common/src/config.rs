use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Moltbook API
    pub moltbook_api_key: String,
    pub moltbook_base_url: String,

    // Ingestion
    pub feed_type: String,
    pub feed_limit: u32,
    pub requests_per_minute: u32,

    // Job periods (seconds)
    pub trending_interval_secs: u64,
    pub agent_refresh_interval_secs: u64,
    pub rescan_interval_secs: u64,

    // Agent refresh
    pub agent_stale_hours: i64,
    pub agent_refresh_cap: i64,

    // Stale comment rescan
    pub rescan_window_days: i64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            moltbook_api_key: required_env("MOLTBOOK_API_KEY"),
            moltbook_base_url: env_or("MOLTBOOK_BASE_URL", "https://www.moltbook.com/api/v1"),
            feed_type: env_or("FEED_TYPE", "hot"),
            feed_limit: parse_env("FEED_LIMIT", 50),
            requests_per_minute: parse_env("REQUESTS_PER_MINUTE", 55),
            trending_interval_secs: parse_env("TRENDING_INTERVAL_SECS", 15 * 60),
            agent_refresh_interval_secs: parse_env("AGENT_REFRESH_INTERVAL_SECS", 60 * 60),
            rescan_interval_secs: parse_env("RESCAN_INTERVAL_SECS", 24 * 60 * 60),
            agent_stale_hours: parse_env("AGENT_STALE_HOURS", 24),
            agent_refresh_cap: parse_env("AGENT_REFRESH_CAP", 200),
            rescan_window_days: parse_env("RESCAN_WINDOW_DAYS", 7),
        }
    }

    /// Log the non-secret parts of the configuration at startup.
    pub fn log_redacted(&self) {
        info!(
            base_url = %self.moltbook_base_url,
            feed = %self.feed_type,
            feed_limit = self.feed_limit,
            requests_per_minute = self.requests_per_minute,
            trending_interval_secs = self.trending_interval_secs,
            agent_refresh_interval_secs = self.agent_refresh_interval_secs,
            rescan_interval_secs = self.rescan_interval_secs,
            rescan_window_days = self.rescan_window_days,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
