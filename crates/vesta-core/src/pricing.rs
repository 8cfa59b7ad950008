//! # Pricing Module
//!
//! Pure quote computation: converting a source-currency amount into a token
//! quantity at a quoted rate, with optional fee loading and explicit decimal
//! precision.
//!
//! ## Conversion Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Quote Arithmetic                                 │
//! │                                                                         │
//! │  rate_scaled = source MAJOR units per WHOLE token × 10^8               │
//! │                                                                         │
//! │    e.g. a token priced at $0.25:  rate_scaled = 25_000_000             │
//! │                                                                         │
//! │  tokens_base =                                                          │
//! │      amount_minor × 10^8 × 10^token_decimals                           │
//! │      ─────────────────────────────────────────   (floor)               │
//! │          10^source_decimals × rate_scaled                              │
//! │                                                                         │
//! │  All intermediates are i128. The division FLOORS: the buyer never      │
//! │  receives rounded-up supply, so rounding can never oversell the cap.   │
//! │                                                                         │
//! │  Fee loading multiplies the rate by (10000 + fee_bps)/10000 (round     │
//! │  half up) BEFORE conversion, making the effective price higher and     │
//! │  the token quantity correspondingly lower.                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};

use crate::amount::{pow10, FeeRate};
use crate::error::{CoreError, CoreResult};
use crate::types::RateQuote;
use crate::RATE_DECIMALS;

// =============================================================================
// Rate Data
// =============================================================================

/// A raw rate observation from an external feed.
///
/// `rate_scaled` is source major units per whole token, scaled by
/// 10^[`RATE_DECIMALS`]. `fetched_at` drives the staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateData {
    pub rate_scaled: i64,
    pub fetched_at: DateTime<Utc>,
}

impl RateData {
    /// Whether the observation is older than `max_age` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.fetched_at > max_age
    }

    /// Age of the observation in whole seconds at `now`.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_seconds()
    }
}

// =============================================================================
// Fee Loading
// =============================================================================

/// Loads a management fee into a scaled rate, rounding half up.
///
/// A fee of 150 bps turns a rate of 1.00 into 1.015: the buyer pays 1.5%
/// more per token, which is how the fee is "layered on top" without a
/// second ledger entry.
pub fn load_fee(rate_scaled: i64, fee: FeeRate) -> CoreResult<i64> {
    if rate_scaled <= 0 {
        return Err(CoreError::NonPositiveRate { rate_scaled });
    }
    if fee.is_zero() {
        return Ok(rate_scaled);
    }

    let loaded = (rate_scaled as i128 * (10_000 + fee.bps() as i128) + 5_000) / 10_000;
    i64::try_from(loaded).map_err(|_| CoreError::AmountOverflow)
}

// =============================================================================
// Conversion
// =============================================================================

/// Converts a source amount in minor units into token base units at the
/// given scaled rate. Floors the result.
pub fn tokens_for_source(
    amount_minor: i64,
    source_decimals: u8,
    token_decimals: u8,
    rate_scaled: i64,
) -> CoreResult<i64> {
    if rate_scaled <= 0 {
        return Err(CoreError::NonPositiveRate { rate_scaled });
    }

    let numerator = (amount_minor as i128)
        .checked_mul(pow10(RATE_DECIMALS))
        .and_then(|v| v.checked_mul(pow10(token_decimals as u32)))
        .ok_or(CoreError::AmountOverflow)?;

    let denominator = pow10(source_decimals as u32)
        .checked_mul(rate_scaled as i128)
        .ok_or(CoreError::AmountOverflow)?;

    let tokens = numerator / denominator;
    i64::try_from(tokens).map_err(|_| CoreError::AmountOverflow)
}

/// Builds a complete, frozen quote for a reservation.
///
/// The fee (when non-zero) is folded into the quoted rate and flagged via
/// `fee_adjusted`, so the stored quote is self-contained: replaying it
/// needs no knowledge of the fee schedule in force at the time.
#[allow(clippy::too_many_arguments)]
pub fn build_quote(
    source_asset: &str,
    target_asset: &str,
    amount_minor: i64,
    source_decimals: u8,
    token_decimals: u8,
    rate: &RateData,
    fee: FeeRate,
    computed_at: DateTime<Utc>,
) -> CoreResult<RateQuote> {
    let effective_rate = load_fee(rate.rate_scaled, fee)?;
    let token_units = tokens_for_source(
        amount_minor,
        source_decimals,
        token_decimals,
        effective_rate,
    )?;

    if token_units <= 0 {
        return Err(CoreError::QuantityTooSmall {
            amount_minor,
            source_asset: source_asset.to_string(),
        });
    }

    Ok(RateQuote {
        source_asset: source_asset.to_string(),
        target_asset: target_asset.to_string(),
        rate_scaled: effective_rate,
        rate_decimals: RATE_DECIMALS,
        fee_bps: fee.bps(),
        fee_adjusted: !fee.is_zero(),
        source_amount_minor: amount_minor,
        token_units,
        computed_at,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
