use std::time::Duration;

/// Engine-wide knobs, recognized as environment variables. Parsed once at
/// startup; no hot-reload.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub scheduler_tick: Duration,
    pub dispatcher_tick: Duration,
    pub liveness_tick: Duration,
    pub heartbeat_stale: Duration,
    pub heartbeat_throttle: Duration,
    pub max_retries: i32,
    pub schedule_batch: i64,
    pub empty_page_streak_limit: u32,
    pub worker_pool_size: usize,
    pub default_page_size: i64,
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Build configuration from the process environment. Call after
    /// `dotenvy::dotenv()` so a `.env` file is honored.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        Ok(Self {
            database_url,
            scheduler_tick: env_duration_secs("SCHEDULER_TICK", 60),
            dispatcher_tick: env_duration_secs("DISPATCHER_TICK", 60),
            liveness_tick: env_duration_secs("LIVENESS_TICK", 60),
            heartbeat_stale: env_duration_secs("HEARTBEAT_STALE", 10 * 60),
            heartbeat_throttle: env_duration_secs("HEARTBEAT_THROTTLE", 30),
            max_retries: env_parse("MAX_RETRIES", 3),
            schedule_batch: env_parse("SCHEDULE_BATCH", 10),
            empty_page_streak_limit: env_parse("EMPTY_PAGE_STREAK_LIMIT", 20),
            worker_pool_size: env_parse("WORKER_POOL_SIZE", 15),
            default_page_size: env_parse("DEFAULT_PAGE_SIZE", 50),
        })
    }
}
