//! Application configuration, loaded the way the teacher's `config/mod.rs`
//! does it: `dotenvy` then `std::env::var` with `.context(...)`, required
//! fields fail fast, everything else gets a sane default.

use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub database_url: String,
    pub jwt_secret: String,

    pub cors_origins: Vec<String>,

    // Transport (§4.1, §6)
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_frame_bytes_market: usize,
    pub max_frame_bytes_contest: usize,
    pub max_frame_bytes_wallet: usize,
    pub max_frame_bytes_notifications: usize,
    pub max_frame_bytes_settings: usize,
    pub outbound_queue_capacity: usize,

    // RateLimiter (§4.3)
    pub rate_limit_default_per_min: u32,
    pub rate_limit_contest_per_min: u32,
    pub rate_limit_market_per_min: u32,
    pub chat_rate_limit_per_10s: u32,
    pub protocol_violation_limit: u32,

    // TopicRouter periodic refreshers (§4.5)
    pub leaderboard_refresh_interval: Duration,
    pub wallet_metrics_refresh_interval: Duration,

    // NotificationDeliverer (§4.7)
    pub outbox_poll_interval: Duration,
    pub outbox_lookback: chrono::Duration,
    pub outbox_retention: chrono::Duration,
    pub outbox_retention_sweep_interval: Duration,
    pub outbox_batch_size: i64,

    // Cache (§4.8)
    pub cache_ttl: Duration,
    pub cache_sweep_interval: Duration,

    // Shutdown (§5)
    pub shutdown_drain: Duration,

    // Subsystem restart policy (§7)
    pub restart_backoff: Duration,
    pub restart_budget: u32,
    pub restart_budget_window: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: env_parse("PORT", 8080)?,
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL required")?,
            jwt_secret: std::env::var("JWT_SECRET").context("JWT_SECRET required")?,

            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173,http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            heartbeat_interval: Duration::from_secs(env_parse("WS_HEARTBEAT_INTERVAL_SECS", 30)?),
            heartbeat_timeout: Duration::from_secs(env_parse("WS_HEARTBEAT_TIMEOUT_SECS", 60)?),
            max_frame_bytes_market: env_parse("WS_MAX_FRAME_MARKET_BYTES", 5 * 1024 * 1024)?,
            max_frame_bytes_contest: env_parse("WS_MAX_FRAME_CONTEST_BYTES", 32 * 1024)?,
            max_frame_bytes_wallet: env_parse("WS_MAX_FRAME_WALLET_BYTES", 32 * 1024)?,
            max_frame_bytes_notifications: env_parse("WS_MAX_FRAME_NOTIFICATIONS_BYTES", 50 * 1024)?,
            max_frame_bytes_settings: env_parse("WS_MAX_FRAME_SETTINGS_BYTES", 2 * 1024 * 1024)?,
            outbound_queue_capacity: env_parse("WS_OUTBOUND_QUEUE_CAPACITY", 256)?,

            rate_limit_default_per_min: env_parse("RATE_LIMIT_DEFAULT_PER_MIN", 100)?,
            rate_limit_contest_per_min: env_parse("RATE_LIMIT_CONTEST_PER_MIN", 120)?,
            rate_limit_market_per_min: env_parse("RATE_LIMIT_MARKET_PER_MIN", 500)?,
            chat_rate_limit_per_10s: env_parse("CHAT_RATE_LIMIT_PER_10S", 10)?,
            protocol_violation_limit: env_parse("PROTOCOL_VIOLATION_LIMIT_PER_MIN", 5)?,

            // Open Question (spec §9): no load-aware backoff, just a knob.
            leaderboard_refresh_interval: Duration::from_secs(env_parse(
                "LEADERBOARD_REFRESH_INTERVAL_SECS",
                5,
            )?),
            wallet_metrics_refresh_interval: Duration::from_secs(env_parse(
                "WALLET_METRICS_REFRESH_INTERVAL_SECS",
                5,
            )?),

            outbox_poll_interval: Duration::from_secs(env_parse("OUTBOX_POLL_INTERVAL_SECS", 5)?),
            outbox_lookback: chrono::Duration::days(env_parse("OUTBOX_LOOKBACK_DAYS", 7)?),
            outbox_retention: chrono::Duration::days(env_parse("OUTBOX_RETENTION_DAYS", 30)?),
            outbox_retention_sweep_interval: Duration::from_secs(env_parse(
                "OUTBOX_RETENTION_SWEEP_INTERVAL_SECS",
                24 * 3600,
            )?),
            outbox_batch_size: env_parse("OUTBOX_BATCH_SIZE", 100)?,

            cache_ttl: Duration::from_secs(env_parse("CACHE_TTL_SECS", 30)?),
            cache_sweep_interval: Duration::from_secs(env_parse("CACHE_SWEEP_INTERVAL_SECS", 5)?),

            shutdown_drain: Duration::from_secs(env_parse("SHUTDOWN_DRAIN_SECS", 5)?),

            restart_backoff: Duration::from_secs(env_parse("RESTART_BACKOFF_SECS", 1)?),
            restart_budget: env_parse("RESTART_BUDGET", 10)?,
            restart_budget_window: Duration::from_secs(env_parse("RESTART_BUDGET_WINDOW_SECS", 300)?),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}
