//! Engine configuration module.
//!
//! Configuration is loaded from environment variables with fallback to
//! defaults. Everything an operator might retune - evidence TTLs, sweep
//! cadence, oracle freshness, gating thresholds, fees, credentials - lives
//! here rather than in code.

use std::env;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};

use vesta_core::{FeeRate, GatingConfig, PaymentRail, DEFAULT_CRYPTO_TTL_SECS, DEFAULT_FIAT_TTL_SECS};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the SQLite ledger database.
    pub database_path: String,

    /// Evidence window for crypto reservations, in seconds.
    pub crypto_ttl_secs: i64,

    /// Evidence window for fiat reservations, in seconds.
    pub fiat_ttl_secs: i64,

    /// Interval between sweeper passes, in seconds.
    pub sweep_interval_secs: u64,

    /// Maximum due reservations expired per sweep pass.
    pub sweep_batch_size: u32,

    /// Timeout applied to each oracle rate fetch, in milliseconds.
    /// The sale-row transaction is never held open waiting on a feed.
    pub rate_timeout_ms: u64,

    /// Bounded retries for transient oracle failures.
    pub rate_max_retries: u32,

    /// Delay between oracle retries, in milliseconds.
    pub rate_retry_delay_ms: u64,

    /// Maximum age of a rate observation before it is rejected as stale,
    /// in seconds.
    pub rate_max_age_secs: i64,

    /// Management fee loaded onto quoted rates, in basis points.
    pub management_fee_bps: u32,

    /// Confirmation depth a crypto transaction must reach before the
    /// receipt poller confirms the reservation.
    pub min_confirmation_depth: u32,

    /// Initial backoff between receipt polls, in milliseconds.
    pub poll_initial_backoff_ms: u64,

    /// Maximum backoff between receipt polls, in seconds.
    pub poll_max_backoff_secs: u64,

    /// Give up polling a receipt after this long, in seconds.
    pub poll_max_elapsed_secs: u64,

    /// Gating policy thresholds.
    pub gating: GatingConfig,

    /// Shared secret for reconciliation webhook credentials.
    pub reconcile_secret: String,

    /// Shared secret for cron sweep-trigger credentials.
    /// Deliberately separate from the reconcile secret.
    pub sweep_secret: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_path: "./vesta.db".to_string(),
            crypto_ttl_secs: DEFAULT_CRYPTO_TTL_SECS,
            fiat_ttl_secs: DEFAULT_FIAT_TTL_SECS,
            sweep_interval_secs: 300,
            sweep_batch_size: 500,
            rate_timeout_ms: 3_000,
            rate_max_retries: 2,
            rate_retry_delay_ms: 250,
            rate_max_age_secs: 300,
            management_fee_bps: 0,
            min_confirmation_depth: 6,
            poll_initial_backoff_ms: 2_000,
            poll_max_backoff_secs: 60,
            poll_max_elapsed_secs: 30 * 60,
            gating: GatingConfig::default(),
            // In production these MUST be set via environment variables
            reconcile_secret: "vesta-reconcile-dev-secret-change-in-production".to_string(),
            sweep_secret: "vesta-sweep-dev-secret-change-in-production".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();

        let config = EngineConfig {
            database_path: env::var("VESTA_DATABASE_PATH")
                .unwrap_or(defaults.database_path),

            crypto_ttl_secs: parse_env("VESTA_CRYPTO_TTL_SECS", defaults.crypto_ttl_secs)?,
            fiat_ttl_secs: parse_env("VESTA_FIAT_TTL_SECS", defaults.fiat_ttl_secs)?,

            sweep_interval_secs: parse_env(
                "VESTA_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            )?,
            sweep_batch_size: parse_env("VESTA_SWEEP_BATCH_SIZE", defaults.sweep_batch_size)?,

            rate_timeout_ms: parse_env("VESTA_RATE_TIMEOUT_MS", defaults.rate_timeout_ms)?,
            rate_max_retries: parse_env("VESTA_RATE_MAX_RETRIES", defaults.rate_max_retries)?,
            rate_retry_delay_ms: parse_env(
                "VESTA_RATE_RETRY_DELAY_MS",
                defaults.rate_retry_delay_ms,
            )?,
            rate_max_age_secs: parse_env("VESTA_RATE_MAX_AGE_SECS", defaults.rate_max_age_secs)?,

            management_fee_bps: parse_env(
                "VESTA_MANAGEMENT_FEE_BPS",
                defaults.management_fee_bps,
            )?,

            min_confirmation_depth: parse_env(
                "VESTA_MIN_CONFIRMATION_DEPTH",
                defaults.min_confirmation_depth,
            )?,
            poll_initial_backoff_ms: parse_env(
                "VESTA_POLL_INITIAL_BACKOFF_MS",
                defaults.poll_initial_backoff_ms,
            )?,
            poll_max_backoff_secs: parse_env(
                "VESTA_POLL_MAX_BACKOFF_SECS",
                defaults.poll_max_backoff_secs,
            )?,
            poll_max_elapsed_secs: parse_env(
                "VESTA_POLL_MAX_ELAPSED_SECS",
                defaults.poll_max_elapsed_secs,
            )?,

            gating: GatingConfig {
                enhanced_threshold_minor: parse_env(
                    "VESTA_ENHANCED_THRESHOLD_MINOR",
                    defaults.gating.enhanced_threshold_minor,
                )?,
            },

            reconcile_secret: env::var("VESTA_RECONCILE_SECRET")
                .unwrap_or(defaults.reconcile_secret),
            sweep_secret: env::var("VESTA_SWEEP_SECRET").unwrap_or(defaults.sweep_secret),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crypto_ttl_secs <= 0 || self.fiat_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "evidence TTLs must be positive".to_string(),
            ));
        }
        if self.sweep_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "VESTA_SWEEP_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.management_fee_bps > 10_000 {
            return Err(ConfigError::InvalidValue(
                "VESTA_MANAGEMENT_FEE_BPS cannot exceed 10000".to_string(),
            ));
        }
        if self.reconcile_secret.is_empty() || self.sweep_secret.is_empty() {
            return Err(ConfigError::MissingRequired("credential secrets".to_string()));
        }
        Ok(())
    }

    /// Evidence TTL for the given payment rail.
    pub fn ttl_for(&self, rail: PaymentRail) -> ChronoDuration {
        match rail {
            PaymentRail::Crypto => ChronoDuration::seconds(self.crypto_ttl_secs),
            PaymentRail::Fiat => ChronoDuration::seconds(self.fiat_ttl_secs),
        }
    }

    /// Oracle fetch timeout as a std Duration.
    pub fn rate_timeout(&self) -> Duration {
        Duration::from_millis(self.rate_timeout_ms)
    }

    /// Management fee as a [`FeeRate`].
    pub fn management_fee(&self) -> FeeRate {
        FeeRate::from_bps(self.management_fee_bps)
    }
}

/// Parses an environment variable, falling back to a default when unset.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
