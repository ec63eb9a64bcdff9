//! Process-wide configuration, loaded once from the environment.

use std::sync::OnceLock;
use std::time::Duration;

/// Tunables read once at startup and shared read-only for the life of the
/// process.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_host: String,
    pub cache_port: u16,
    pub cache_db_index: u32,
    pub cache_password: Option<String>,
    pub tcp_connect_retries: u32,
    pub tcp_connect_retry_delay: Duration,
    pub subprocess_term_grace: Duration,
    /// Throughput, in bytes/second, above which a filter's output is
    /// considered too cheap to recompute to bother caching.
    pub cache_output_threshold_bytes_per_sec: f64,
}

impl Config {
    fn from_env() -> Self {
        Self {
            cache_host: env_or("FILTERSTACK_CACHE_HOST", "127.0.0.1"),
            cache_port: env_parse_or("FILTERSTACK_CACHE_PORT", 6379),
            cache_db_index: env_parse_or("FILTERSTACK_CACHE_DB", 0),
            cache_password: std::env::var("FILTERSTACK_CACHE_PASSWORD").ok(),
            tcp_connect_retries: env_parse_or("FILTERSTACK_TCP_CONNECT_RETRIES", 10),
            tcp_connect_retry_delay: Duration::from_millis(env_parse_or(
                "FILTERSTACK_TCP_CONNECT_RETRY_DELAY_MS",
                1000,
            )),
            subprocess_term_grace: Duration::from_millis(env_parse_or(
                "FILTERSTACK_SUBPROCESS_TERM_GRACE_MS",
                1000,
            )),
            cache_output_threshold_bytes_per_sec: env_parse_or(
                "FILTERSTACK_CACHE_OUTPUT_THRESHOLD_BPS",
                2.0 * 1024.0 * 1024.0,
            ),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// The process-wide configuration, loaded from the environment on first
/// access and cached thereafter.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_env_unset() {
        let cfg = Config::from_env();
        assert_eq!(cfg.cache_port, 6379);
        assert_eq!(cfg.tcp_connect_retries, 10);
    }

    #[test]
    fn test_config_singleton_is_stable() {
        let a = config() as *const Config;
        let b = config() as *const Config;
        assert_eq!(a, b);
    }
}
