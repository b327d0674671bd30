//! Process configuration, loaded once at startup from the environment.
//!
//! Mirrors spec.md §6's enumerated environment variables. `DB_URL` is the
//! only required variable; everything else has a documented default so the
//! engine starts in a sane configuration with nothing but a database to
//! talk to.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string. Required.
    pub db_url: String,
    /// Optional; absence degrades outbound notification fan-out to inline.
    pub redis_url: Option<String>,

    pub worker_tick_bidding: Duration,
    pub worker_tick_confirmation: Duration,
    pub worker_tick_idempotency_gc: Duration,
    pub worker_tick_pending: Duration,
    pub worker_tick_reconciliation: Duration,

    pub confirmation_timeout: Duration,
    pub idempotency_ttl: Duration,
    pub pending_order_ttl: Duration,

    pub transaction_max_retries: u32,
    pub transaction_timeout: Duration,

    pub pg_pool_size: u32,

    // Logging (teacher: src/logging.rs)
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub rotation: String,
    pub use_json: bool,
    pub enable_tracing: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

impl AppConfig {
    /// Load configuration from the process environment, failing fast only on
    /// the one variable that has no safe default: `DB_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_url = std::env::var("DB_URL").map_err(|_| ConfigError::Missing("DB_URL"))?;

        Ok(Self {
            db_url,
            redis_url: std::env::var("REDIS_URL").ok(),

            worker_tick_bidding: env_secs("WORKER_TICK_BIDDING", 120)?,
            worker_tick_confirmation: env_secs("WORKER_TICK_CONFIRMATION", 120)?,
            worker_tick_idempotency_gc: env_secs("WORKER_TICK_IDEMPOTENCY_GC", 3600)?,
            worker_tick_pending: env_secs("WORKER_TICK_PENDING", 21600)?,
            worker_tick_reconciliation: env_secs("WORKER_TICK_RECONCILIATION", 86400)?,

            confirmation_timeout: env_mins("CONFIRMATION_TIMEOUT_MIN", 15)?,
            idempotency_ttl: env_secs("IDEMPOTENCY_TTL_SEC", 86400)?,
            pending_order_ttl: env_secs("PENDING_ORDER_TTL_SEC", 86400)?,

            transaction_max_retries: env_parse("TRANSACTION_MAX_RETRIES", 3)?,
            transaction_timeout: env_millis("TRANSACTION_TIMEOUT_MS", 10_000)?,

            pg_pool_size: env_parse("PG_POOL_SIZE", 10)?,

            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_dir: std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string()),
            log_file: std::env::var("LOG_FILE")
                .unwrap_or_else(|_| "order_fulfillment.log".to_string()),
            rotation: std::env::var("LOG_ROTATION").unwrap_or_else(|_| "daily".to_string()),
            use_json: env_bool("LOG_JSON", false),
            enable_tracing: env_bool("ENABLE_TRACING", true),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid { var: name, value: v }),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    env_parse(name, default).map(Duration::from_secs)
}

fn env_millis(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    env_parse(name, default).map(Duration::from_millis)
}

fn env_mins(name: &'static str, default_minutes: u64) -> Result<Duration, ConfigError> {
    env_parse(name, default_minutes).map(|m: u64| Duration::from_secs(m * 60))
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_db_url_is_an_error() {
        // SAFETY: test-only env mutation, single-threaded test binary assumption
        // shared with the rest of this module's tests.
        unsafe {
            std::env::remove_var("DB_URL");
        }
        assert!(matches!(AppConfig::from_env(), Err(ConfigError::Missing("DB_URL"))));
    }

    #[test]
    fn defaults_apply_when_unset() {
        unsafe {
            std::env::set_var("DB_URL", "postgres://localhost/test");
            std::env::remove_var("WORKER_TICK_BIDDING");
        }
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.worker_tick_bidding, Duration::from_secs(120));
        assert_eq!(cfg.transaction_max_retries, 3);
    }
}
