//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::SagaConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `STEP_TIMEOUT_MS`: wait for each saga step response (default: `5000`)
/// - `SELL_PAYOUT_PERCENT`: share of the unit price paid on sale, `1..=100`
///   (default: `80`)
/// - `DATABASE_URL`: PostgreSQL checkpoint store; in memory when unset
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub step_timeout_ms: u64,
    pub sell_payout_percent: u32,
    pub database_url: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            step_timeout_ms: var("STEP_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.step_timeout_ms),
            sell_payout_percent: var("SELL_PAYOUT_PERCENT")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|percent| (1..=100).contains(percent))
                .unwrap_or(defaults.sell_payout_percent),
            database_url: var("DATABASE_URL").filter(|url| !url.is_empty()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Saga settings derived from this configuration.
    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig::default()
            .with_step_timeout(Duration::from_millis(self.step_timeout_ms))
            .with_sell_payout_percent(self.sell_payout_percent)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            step_timeout_ms: 5000,
            sell_payout_percent: 80,
            database_url: None,
        }
    }
}
