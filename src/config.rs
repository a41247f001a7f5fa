//! Environment-driven process configuration.
//!
//! Loaded once in `main`, shared as immutable state (spec §5: "the only
//! in-process shared state permitted in the core is configuration").
//! Shape follows the pack's `OnrampProcessorConfig::from_env` /
//! `TransactionMonitorConfig::from_env`: a `Default` impl for the fallback
//! values, then a `from_env` that overrides each field if the matching
//! variable parses.

use crate::models::Thresholds;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub ledger_base: String,
    pub api_key: Option<String>,
    pub internal_trust_key: Option<String>,
    pub default_thresholds: Thresholds,
    pub cache_ttl: Duration,
    pub rate_max: u32,
    pub rate_window: Duration,
    pub batch_max: usize,
    pub batch_concurrency: usize,
    pub ledger_timeout: Duration,
    pub webhook_timeout: Duration,
    pub webhook_attempts: u32,
    pub webhook_backoff: Vec<Duration>,
    pub database_url: String,
    pub bind_address: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_base: "https://api.mainnet.minepi.com".to_string(),
            api_key: None,
            internal_trust_key: None,
            default_thresholds: Thresholds::default(),
            cache_ttl: Duration::from_secs(3600),
            rate_max: 5,
            rate_window: Duration::from_secs(3600),
            batch_max: 10,
            batch_concurrency: 3,
            ledger_timeout: Duration::from_secs(30),
            webhook_timeout: Duration::from_secs(10),
            webhook_attempts: 3,
            webhook_backoff: vec![
                Duration::from_secs(0),
                Duration::from_secs(1),
                Duration::from_secs(5),
            ],
            database_url: "postgres://localhost/business_verifier".to_string(),
            bind_address: "0.0.0.0:8088".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let base = Self::default();

        let min_total = env_parse("MIN_TRANSACTIONS", base.default_thresholds.min_total);
        let min_credited = env_parse(
            "MIN_CREDITED_TRANSACTIONS",
            base.default_thresholds.min_credited,
        );
        let min_unique = env_parse("MIN_UNIQUE_WALLETS", base.default_thresholds.min_unique);

        Self {
            ledger_base: env_string("LEDGER_BASE", &base.ledger_base),
            api_key: std::env::var("API_KEY").ok(),
            internal_trust_key: std::env::var("INTERNAL_TRUST_KEY").ok(),
            default_thresholds: Thresholds {
                min_total,
                min_credited,
                min_unique,
            },
            cache_ttl: Duration::from_secs(env_parse("CACHE_TTL_SECS", base.cache_ttl.as_secs())),
            rate_max: env_parse("RATE_MAX", base.rate_max),
            rate_window: Duration::from_secs(env_parse(
                "RATE_WINDOW_SECS",
                base.rate_window.as_secs(),
            )),
            batch_max: env_parse("BATCH_MAX", base.batch_max),
            batch_concurrency: env_parse("BATCH_CONCURRENCY", base.batch_concurrency),
            ledger_timeout: Duration::from_secs(env_parse(
                "LEDGER_TIMEOUT_SECS",
                base.ledger_timeout.as_secs(),
            )),
            webhook_timeout: Duration::from_secs(env_parse(
                "WEBHOOK_TIMEOUT_SECS",
                base.webhook_timeout.as_secs(),
            )),
            webhook_attempts: env_parse("WEBHOOK_ATTEMPTS", base.webhook_attempts),
            webhook_backoff: base.webhook_backoff.clone(),
            database_url: env_string("DATABASE_URL", &base.database_url),
            bind_address: env_string("BIND_ADDRESS", &base.bind_address),
        }
    }
}
