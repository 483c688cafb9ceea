use serde::Deserialize;
use std::time::Duration;

/// Configuration for the outbound dispatcher service.
///
/// This covers the worker pool, retry policy, rate limiter and upstream
/// client. Each setting has a sensible default where possible to minimize
/// configuration overhead.
#[derive(Deserialize, Debug, Clone)]
pub struct DispatcherConfig {
    // Worker pool configuration
    /// Number of dispatcher workers in this process
    pub worker_count: usize,
    /// Visibility timeout granted to a dequeued command, in seconds
    pub visibility_timeout_secs: u64,
    /// How long an idle worker blocks on the queue before looping, in seconds
    pub dequeue_wait_secs: u64,
    /// Grace period for in-flight commands on shutdown, in seconds
    pub drain_timeout_secs: u64,

    // Retry configuration
    /// Maximum delivery attempts before a message fails terminally
    pub retry_max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub retry_backoff_base_ms: u64,
    /// Backoff multiplier applied per attempt
    pub retry_backoff_factor: u32,
    /// Backoff ceiling in milliseconds
    pub retry_backoff_cap_ms: u64,
    /// Jitter fraction applied to each backoff (0.25 = ±25%)
    pub retry_jitter: f64,

    // Rate limiter configuration
    /// Messages per second allowed per phone number
    pub limiter_per_number_rate: u32,
    /// Messages per second allowed per workspace
    pub limiter_workspace_rate: u32,
    /// Messages per second allowed process-wide
    pub limiter_global_rate: u32,

    // Upstream client configuration
    /// Base URL of the Cloud API
    pub upstream_base_url: String,
    /// API version segment (e.g. "v23.0")
    pub upstream_api_version: String,
    /// Connection timeout in milliseconds
    pub upstream_connect_timeout_ms: u64,
    /// Total request timeout in milliseconds
    pub upstream_total_timeout_ms: u64,
}

impl DispatcherConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let default_workers = 4 * std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            worker_count: read_or("WORKERS_COUNT", default_workers),
            visibility_timeout_secs: read_or("WORKERS_VISIBILITY_TIMEOUT_SECS", 60),
            dequeue_wait_secs: read_or("WORKERS_DEQUEUE_WAIT_SECS", 5),
            drain_timeout_secs: read_or("WORKERS_DRAIN_TIMEOUT_SECS", 30),

            retry_max_attempts: read_or("RETRY_MAX_ATTEMPTS", 5),
            retry_backoff_base_ms: read_or("RETRY_BACKOFF_BASE_MS", 1000),
            retry_backoff_factor: read_or("RETRY_BACKOFF_FACTOR", 2),
            retry_backoff_cap_ms: read_or("RETRY_BACKOFF_CAP_MS", 300_000),
            retry_jitter: read_or("RETRY_BACKOFF_JITTER", 0.25),

            limiter_per_number_rate: read_or("LIMITER_PER_NUMBER_RATE", 80),
            limiter_workspace_rate: read_or("LIMITER_WORKSPACE_RATE", 200),
            limiter_global_rate: read_or("LIMITER_GLOBAL_RATE", 500),

            upstream_base_url: std::env::var("UPSTREAM_BASE_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com".to_string()),
            upstream_api_version: std::env::var("UPSTREAM_API_VERSION")
                .unwrap_or_else(|_| "v23.0".to_string()),
            upstream_connect_timeout_ms: read_or("UPSTREAM_CONNECT_TIMEOUT_MS", 5_000),
            upstream_total_timeout_ms: read_or("UPSTREAM_TOTAL_TIMEOUT_MS", 30_000),
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn dequeue_wait(&self) -> Duration {
        Duration::from_secs(self.dequeue_wait_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_connect_timeout_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_total_timeout_ms)
    }

    /// Full URL for a rendered resource path.
    pub fn upstream_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.upstream_base_url, self.upstream_api_version, path
        )
    }
}

fn read_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|_| panic!("{} must be a valid value", name)),
        Err(_) => default,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> DispatcherConfig {
        DispatcherConfig {
            worker_count: 2,
            visibility_timeout_secs: 60,
            dequeue_wait_secs: 1,
            drain_timeout_secs: 5,
            retry_max_attempts: 5,
            retry_backoff_base_ms: 1000,
            retry_backoff_factor: 2,
            retry_backoff_cap_ms: 300_000,
            retry_jitter: 0.25,
            limiter_per_number_rate: 80,
            limiter_workspace_rate: 200,
            limiter_global_rate: 500,
            upstream_base_url: "https://graph.facebook.com".to_string(),
            upstream_api_version: "v23.0".to_string(),
            upstream_connect_timeout_ms: 5_000,
            upstream_total_timeout_ms: 30_000,
        }
    }

    #[test]
    fn test_upstream_url_construction() {
        let config = test_config();
        assert_eq!(
            config.upstream_url("1029384756/messages"),
            "https://graph.facebook.com/v23.0/1029384756/messages"
        );
    }

    #[test]
    fn test_defaults_without_env() {
        unsafe {
            std::env::remove_var("RETRY_MAX_ATTEMPTS");
            std::env::remove_var("LIMITER_PER_NUMBER_RATE");
        }
        let config = DispatcherConfig::from_env();
        assert_eq!(config.retry_max_attempts, 5);
        assert_eq!(config.limiter_per_number_rate, 80);
        assert_eq!(config.visibility_timeout(), Duration::from_secs(60));
    }
}
