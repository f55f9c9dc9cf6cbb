//! Environment-driven configuration: a plain struct populated from
//! `std::env` with explicit defaults, rather than a generated or derived
//! settings model.

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    // =========================
    // Connection settings
    // =========================
    /// Assembled from `DATABASE_URL_OVERRIDE` if set, else from
    /// `POSTGRES_*`; falls back to a local sqlite file so the crate runs
    /// without any external service for development/testing.
    pub database_url: String,
    pub redis_url: String,
    pub nats_url: String,
    pub stream_name: String,

    // =========================
    // Worker enablement
    // =========================
    pub enable_planner: bool,
    pub enable_dispatcher: bool,
    pub enable_ack_consumer: bool,
    pub enable_timeout_sweeper: bool,

    // =========================
    // Planner
    // =========================
    pub planner_batch_size: i64,
    pub idempotency_ttl_sec: u64,
    pub redis_prefix: String,

    // =========================
    // Dispatcher
    // =========================
    pub ack_timeout_sec: i64,
    pub max_concurrency: usize,
    pub dispatch_batch_size: i64,
    pub dispatch_poll_sec: f64,
    pub dispatch_max_retry: i32,
    pub dispatch_retry_backoff_sec: f64,
    pub dispatch_retry_jitter_sec: f64,
    pub max_inflight_per_microcontroller: i64,

    // =========================
    // Timeout sweeper
    // =========================
    pub timeout_sweeper_interval_sec: f64,
    pub timeout_sweeper_batch_size: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL_OVERRIDE").unwrap_or_else(|_| {
            let user = env_str("POSTGRES_USER", "postgres");
            let password = env_str("POSTGRES_PASSWORD", "postgres");
            let host = env_str("POSTGRES_HOST", "localhost");
            let port = env_parsed("POSTGRES_PORT", 5432u16);
            let name = env_str("POSTGRES_NAME", "smart-dev-test");
            format!("postgres://{user}:{password}@{host}:{port}/{name}")
        });

        let redis_host = env_str("REDIS_HOST", "localhost");
        let redis_port = env_parsed("REDIS_PORT", 6379u16);
        let redis_url = format!("redis://{redis_host}:{redis_port}");

        let cfg = Self {
            database_url,
            redis_url,
            nats_url: env_str("NATS_URL", "nats://localhost:4222"),
            stream_name: env_str("STREAM_NAME", "device_communication"),

            enable_planner: env_bool("SCHEDULER_ENABLE_PLANNER", true),
            enable_dispatcher: env_bool("SCHEDULER_ENABLE_DISPATCHER", true),
            enable_ack_consumer: env_bool("SCHEDULER_ENABLE_ACK_CONSUMER", true),
            enable_timeout_sweeper: env_bool("SCHEDULER_ENABLE_TIMEOUT_SWEEPER", true),

            planner_batch_size: env_parsed("SCHEDULER_PLANNER_BATCH_SIZE", 1000),
            idempotency_ttl_sec: env_parsed("SCHEDULER_IDEMPOTENCY_TTL_SEC", 120),
            redis_prefix: env_str("SCHEDULER_REDIS_PREFIX", "smart-schedulers"),

            ack_timeout_sec: env_parsed("SCHEDULER_ACK_TIMEOUT_SEC", 3),
            max_concurrency: env_parsed("SCHEDULER_MAX_CONCURRENCY", 25),
            dispatch_batch_size: env_parsed("SCHEDULER_DISPATCH_BATCH_SIZE", 500),
            dispatch_poll_sec: env_parsed("SCHEDULER_DISPATCH_POLL_SEC", 0.2),
            dispatch_max_retry: env_parsed("SCHEDULER_DISPATCH_MAX_RETRY", 1),
            dispatch_retry_backoff_sec: env_parsed("SCHEDULER_DISPATCH_RETRY_BACKOFF_SEC", 0.25),
            dispatch_retry_jitter_sec: env_parsed("SCHEDULER_DISPATCH_RETRY_JITTER_SEC", 0.25),
            max_inflight_per_microcontroller: env_parsed(
                "SCHEDULER_MAX_INFLIGHT_PER_MICROCONTROLLER",
                1,
            ),

            timeout_sweeper_interval_sec: env_parsed("SCHEDULER_TIMEOUT_SWEEPER_INTERVAL_SEC", 1.0),
            timeout_sweeper_batch_size: env_parsed("SCHEDULER_TIMEOUT_SWEEPER_BATCH_SIZE", 500),
        };

        cfg.log_resolved();
        cfg
    }

    fn log_resolved(&self) {
        tracing::info!(
            enable_planner = self.enable_planner,
            enable_dispatcher = self.enable_dispatcher,
            enable_ack_consumer = self.enable_ack_consumer,
            enable_timeout_sweeper = self.enable_timeout_sweeper,
            planner_batch_size = self.planner_batch_size,
            idempotency_ttl_sec = self.idempotency_ttl_sec,
            ack_timeout_sec = self.ack_timeout_sec,
            max_concurrency = self.max_concurrency,
            dispatch_batch_size = self.dispatch_batch_size,
            max_inflight_per_microcontroller = self.max_inflight_per_microcontroller,
            timeout_sweeper_interval_sec = self.timeout_sweeper_interval_sec,
            "resolved scheduler configuration"
        );
    }
}
