//! # Price Oracle Adapter
//!
//! Converts a requested source-currency amount into a token quantity at a
//! quoted rate, with fee loading and an explicit freshness threshold.
//!
//! ## Responsibilities
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       PriceOracle<S: RateSource>                        │
//! │                                                                         │
//! │  1. Fetch the rate from the source UNDER A TIMEOUT                     │
//! │     └── a slow feed surfaces as RateUnavailable; the caller's          │
//! │         sale-row transaction is never held open waiting                │
//! │                                                                         │
//! │  2. Reject stale observations (StaleRate)                              │
//! │                                                                         │
//! │  3. Load the management fee into the rate and compute the quote        │
//! │     (pure math in vesta-core::pricing)                                 │
//! │                                                                         │
//! │  Quotes are pure values. Freezing a quote onto a reservation is the    │
//! │  caller's job - the oracle itself holds no state per request.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::debug;

use vesta_core::{pricing, FeeRate, RateData, RateQuote};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Rate Source Trait
// =============================================================================

/// Abstraction over an external rate feed.
///
/// Implementations fetch (or serve from a refreshed cache) the current rate
/// for a source→token pair. The returned future must be `Send` so engine
/// operations remain spawnable.
pub trait RateSource: Send + Sync {
    /// Current rate for one whole token, priced in the source asset's major
    /// units and scaled by 10^[`vesta_core::RATE_DECIMALS`].
    fn current_rate(
        &self,
        source_asset: &str,
        target_asset: &str,
    ) -> impl Future<Output = EngineResult<RateData>> + Send;
}

/// Shared sources are sources too: components can hold the same feed
/// behind an `Arc` without a wrapper type.
impl<S: RateSource> RateSource for std::sync::Arc<S> {
    fn current_rate(
        &self,
        source_asset: &str,
        target_asset: &str,
    ) -> impl Future<Output = EngineResult<RateData>> + Send {
        (**self).current_rate(source_asset, target_asset)
    }
}

// =============================================================================
// Oracle Configuration
// =============================================================================

/// Configuration for the oracle adapter.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Timeout applied to each rate fetch.
    pub fetch_timeout: Duration,

    /// Maximum age of a rate observation before it is rejected.
    pub max_age: chrono::Duration,

    /// Management fee loaded into quoted rates.
    pub fee: FeeRate,
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            fetch_timeout: Duration::from_secs(3),
            max_age: chrono::Duration::seconds(300),
            fee: FeeRate::zero(),
        }
    }
}

// =============================================================================
// Price Oracle
// =============================================================================

/// The price oracle adapter: a rate source plus quoting policy.
#[derive(Debug)]
pub struct PriceOracle<S> {
    source: S,
    config: OracleConfig,
}

impl<S: RateSource> PriceOracle<S> {
    /// Creates an oracle over the given source.
    pub fn new(source: S, config: OracleConfig) -> Self {
        PriceOracle { source, config }
    }

    /// Produces a quote for converting `amount_minor` of the source asset
    /// into the target token.
    ///
    /// ## Errors
    /// - `RateUnavailable` - the source failed or exceeded the fetch timeout
    /// - `StaleRate` - the observation is older than the freshness threshold
    /// - `UnquotableAmount` - the amount overflows or converts to dust
    pub async fn quote(
        &self,
        source_asset: &str,
        target_asset: &str,
        amount_minor: i64,
        source_decimals: u8,
        token_decimals: u8,
    ) -> EngineResult<RateQuote> {
        let rate = timeout(
            self.config.fetch_timeout,
            self.source.current_rate(source_asset, target_asset),
        )
        .await
        .map_err(|_| {
            EngineError::RateUnavailable(format!(
                "rate fetch for {}/{} timed out",
                source_asset, target_asset
            ))
        })??;

        let now = Utc::now();
        if rate.is_stale(now, self.config.max_age) {
            return Err(EngineError::StaleRate {
                age_secs: rate.age_secs(now),
                max_age_secs: self.config.max_age.num_seconds(),
            });
        }

        debug!(
            source = source_asset,
            target = target_asset,
            rate_scaled = rate.rate_scaled,
            "Quoting"
        );

        let quote = pricing::build_quote(
            source_asset,
            target_asset,
            amount_minor,
            source_decimals,
            token_decimals,
            &rate,
            self.config.fee,
            now,
        )?;

        Ok(quote)
    }
}

// =============================================================================
// Fixed Rate Source (tests, local development)
// =============================================================================

/// In-memory rate source with operator-set rates.
///
/// Useful for tests and for local development without a live feed. Rates
/// are keyed by (source, target) pair; updating a rate never affects quotes
/// already frozen onto reservations.
#[derive(Debug, Default)]
pub struct FixedRateSource {
    rates: RwLock<HashMap<(String, String), RateData>>,
}

impl FixedRateSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        FixedRateSource {
            rates: RwLock::new(HashMap::new()),
        }
    }

    /// Sets (or replaces) the rate for a pair.
    pub async fn set_rate(&self, source_asset: &str, target_asset: &str, rate: RateData) {
        self.rates
            .write()
            .await
            .insert((source_asset.to_string(), target_asset.to_string()), rate);
    }
}

impl RateSource for FixedRateSource {
    async fn current_rate(
        &self,
        source_asset: &str,
        target_asset: &str,
    ) -> EngineResult<RateData> {
        self.rates
            .read()
            .await
            .get(&(source_asset.to_string(), target_asset.to_string()))
            .copied()
            .ok_or_else(|| {
                EngineError::RateUnavailable(format!(
                    "no rate configured for {}/{}",
                    source_asset, target_asset
                ))
            })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
