use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
pub struct GatewayConfig {
    /// Token echoed back during upstream webhook subscription.
    pub verify_token: String,
    /// Maximum accepted webhook body size in bytes.
    pub max_body_bytes: usize,
    /// Event dedupe window; must cover the upstream's retry horizon.
    pub dedupe_ttl_hours: u64,
    /// Grace period for out-of-order status receipts.
    pub status_grace_secs: u64,
    pub host: String,
    pub port: u16,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            verify_token: std::env::var("WEBHOOK_VERIFY_TOKEN")
                .expect("WEBHOOK_VERIFY_TOKEN must be set"),
            max_body_bytes: std::env::var("WEBHOOK_MAX_BODY_BYTES")
                .unwrap_or_else(|_| (1024 * 1024).to_string())
                .parse()
                .expect("WEBHOOK_MAX_BODY_BYTES must be a valid number"),
            dedupe_ttl_hours: std::env::var("WEBHOOK_DEDUPE_TTL_HOURS")
                .unwrap_or_else(|_| "72".to_string())
                .parse()
                .expect("WEBHOOK_DEDUPE_TTL_HOURS must be a valid number"),
            status_grace_secs: std::env::var("WEBHOOK_STATUS_GRACE_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .expect("WEBHOOK_STATUS_GRACE_SECS must be a valid number"),
            host: std::env::var("WEBHOOK_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("WEBHOOK_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .expect("WEBHOOK_PORT must be a valid number"),
        }
    }

    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.dedupe_ttl_hours * 3600)
    }

    pub fn status_grace(&self) -> Duration {
        Duration::from_secs(self.status_grace_secs)
    }

    pub fn listen_address(&self) -> std::net::SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid host or port")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> GatewayConfig {
        GatewayConfig {
            verify_token: "verify-me".to_string(),
            max_body_bytes: 1024 * 1024,
            dedupe_ttl_hours: 72,
            status_grace_secs: 30,
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }

    #[test]
    fn test_derived_durations() {
        let config = test_config();
        assert_eq!(config.dedupe_ttl(), Duration::from_secs(72 * 3600));
        assert_eq!(config.status_grace(), Duration::from_secs(30));
    }
}
