use redis::aio::ConnectionManager;
use sqlx::PgPool;

#[derive(Clone)]
pub struct Config {
    pub partition_count: u32,
    pub stream_retry_ceiling: u32,
    pub stream_visibility_timeout_secs: u64,
    pub stream_batch_max: usize,
    pub stream_poll_interval_ms: u64,
    pub presence_ttl_secs: u64,
    pub replay_ttl_secs: u64,
    pub replay_max_per_conversation: u64,
    pub idempotency_ttl_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max: u64,
    pub max_content_len: usize,
    pub db_pool_min: u32,
    pub db_pool_max: u32,
}

impl Config {
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        Self {
            partition_count: var("STREAM_PARTITION_COUNT", 16),
            stream_retry_ceiling: var("STREAM_RETRY_CEILING", 3),
            stream_visibility_timeout_secs: var("STREAM_VISIBILITY_TIMEOUT_SECS", 30),
            stream_batch_max: var("STREAM_BATCH_MAX", 50),
            stream_poll_interval_ms: var("STREAM_POLL_INTERVAL_MS", 250),
            presence_ttl_secs: var("PRESENCE_TTL_SECS", 45),
            replay_ttl_secs: var("REPLAY_TTL_SECS", 300),
            replay_max_per_conversation: var("REPLAY_MAX_PER_CONVERSATION", 500),
            idempotency_ttl_secs: var("IDEMPOTENCY_TTL_SECS", 6 * 3600),
            rate_limit_window_secs: var("RATE_LIMIT_WINDOW_SECS", 60),
            rate_limit_max: var("RATE_LIMIT_MAX", 120),
            max_content_len: var("MAX_CONTENT_LEN", 10_000),
            db_pool_min: var("DB_POOL_MIN", 2),
            db_pool_max: var("DB_POOL_MAX", 16),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub redis: ConnectionManager,
    pub redis_url: String,
    pub instance_id: String,
    pub config: Config,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        redis: ConnectionManager,
        redis_url: String,
        instance_id: String,
        config: Config,
    ) -> Self {
        Self {
            pool,
            redis,
            redis_url,
            instance_id,
            config,
        }
    }
}
