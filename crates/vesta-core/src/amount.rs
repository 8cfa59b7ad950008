//! # Amount Module
//!
//! Fixed-point token and currency arithmetic.
//!
//! ## Why Integer Amounts?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In JavaScript/floating point:                                          │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  In a token sale that error compounds across thousands of              │
//! │  reservations and the capacity counters stop adding up.                │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Base Units                                       │
//! │    A token with 6 decimals is counted in millionths.                   │
//! │    A USD amount is counted in cents.                                    │
//! │    Conversions use i128 intermediates and explicit rounding.           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use vesta_core::amount::{TokenAmount, FeeRate};
//!
//! // 200 tokens at 6 decimals
//! let quantity = TokenAmount::from_units(200_000_000);
//!
//! // A 1.5% management fee
//! let fee = FeeRate::from_bps(150);
//! assert_eq!(fee.apply(10_000), 150);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

// =============================================================================
// Token Amount
// =============================================================================

/// A token quantity in base units (the token scaled by 10^decimals).
///
/// ## Design Decisions
/// - **i64 (signed)**: matches the ledger columns; negative values only ever
///   appear transiently in arithmetic, never in stored state
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **Decimals live on the sale**, not the amount - the same way a cents
///   value does not carry "USD" around with it
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TokenAmount(i64);

impl TokenAmount {
    /// Creates an amount from base units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        TokenAmount(units)
    }

    /// Returns the value in base units.
    #[inline]
    pub const fn units(&self) -> i64 {
        self.0
    }

    /// Zero amount.
    #[inline]
    pub const fn zero() -> Self {
        TokenAmount(0)
    }

    /// Checks if the amount is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the amount is strictly positive.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checked addition; `None` on overflow.
    #[inline]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(TokenAmount)
    }

    /// Checked subtraction; `None` on overflow.
    #[inline]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(TokenAmount)
    }

    /// Renders the amount with an explicit decimal precision.
    ///
    /// ## Example
    /// ```rust
    /// use vesta_core::amount::TokenAmount;
    ///
    /// let qty = TokenAmount::from_units(200_500_000);
    /// assert_eq!(qty.format(6), "200.500000");
    /// ```
    pub fn format(&self, decimals: u8) -> String {
        if decimals == 0 {
            return self.0.to_string();
        }
        let scale = pow10(decimals as u32);
        let value = self.0 as i128;
        let sign = if value < 0 { "-" } else { "" };
        let whole = (value / scale).abs();
        let frac = (value % scale).abs();
        format!(
            "{}{}.{:0width$}",
            sign,
            whole,
            frac,
            width = decimals as usize
        )
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for TokenAmount {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        TokenAmount(self.0 + other.0)
    }
}

impl AddAssign for TokenAmount {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for TokenAmount {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        TokenAmount(self.0 - other.0)
    }
}

impl SubAssign for TokenAmount {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

// =============================================================================
// Fee Rate
// =============================================================================

/// A fee rate in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 150 bps = 1.50% (a typical management fee)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate(u32);

impl FeeRate {
    /// Creates a fee rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        FeeRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero fee rate.
    #[inline]
    pub const fn zero() -> Self {
        FeeRate(0)
    }

    /// Checks if the fee rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Applies the fee to an integer amount, rounding half up.
    ///
    /// ## Implementation
    /// Integer math with an i128 intermediate: `(amount * bps + 5000) / 10000`.
    /// The +5000 provides the rounding (5000/10000 = 0.5).
    ///
    /// ## Example
    /// ```rust
    /// use vesta_core::amount::FeeRate;
    ///
    /// let fee = FeeRate::from_bps(150); // 1.5%
    /// assert_eq!(fee.apply(10_000), 150);
    /// ```
    pub fn apply(&self, amount: i64) -> i64 {
        ((amount as i128 * self.0 as i128 + 5000) / 10000) as i64
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        FeeRate::zero()
    }
}

// =============================================================================
// Powers of Ten
// =============================================================================

/// Returns 10^exp as i128 for decimal rescaling.
///
/// Decimal precisions in this system are small (token decimals <= 18,
/// rate precision 8), so i128 never overflows here.
pub const fn pow10(exp: u32) -> i128 {
    let mut result: i128 = 1;
    let mut i = 0;
    while i < exp {
        result *= 10;
        i += 1;
    }
    result
}

// =============================================================================
// Unit Tests
// =============================================================================
