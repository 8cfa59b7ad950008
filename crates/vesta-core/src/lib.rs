//! # vesta-core: Pure Business Logic for Vesta
//!
//! This crate is the **heart** of Vesta. It contains all business logic for
//! the token-sale allocation engine as pure functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Vesta Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    vesta-engine                                 │   │
//! │  │   AllocationEngine ── ReconciliationGateway ── Sweeper          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ vesta-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  amount   │  │  pricing  │  │  gating   │  │   │
//! │  │   │   Sale    │  │TokenAmount│  │   Quote   │  │  policy   │  │   │
//! │  │   │Reservation│  │  FeeRate  │  │   math    │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    vesta-db (Ledger Store)                      │   │
//! │  │          SQLite queries, migrations, atomic transitions         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, Reservation, Evidence, etc.)
//! - [`amount`] - Fixed-point token/currency arithmetic (no floating point!)
//! - [`pricing`] - Quote computation and rate staleness
//! - [`gating`] - KYC gating policy
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: same input = same output; `now` is an argument,
//!    never read from a clock
//! 2. **No I/O**: database, network, file system access is FORBIDDEN here
//! 3. **Integer Amounts**: all quantities are i64 base units / minor units
//! 4. **Explicit Errors**: all errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod amount;
pub mod error;
pub mod gating;
pub mod pricing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use vesta_core::TokenAmount` instead of
// `use vesta_core::amount::TokenAmount`

pub use amount::{FeeRate, TokenAmount};
pub use error::{CoreError, ValidationError};
pub use gating::GatingConfig;
pub use pricing::RateData;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Decimal precision of scaled rates: source major units per whole token,
/// times 10^8. Recorded on every frozen quote so stored quotes stay
/// self-describing if this ever changes.
pub const RATE_DECIMALS: u32 = 8;

/// Default evidence window for crypto reservations: the buyer must submit a
/// transaction hash within this TTL before the slot is released.
pub const DEFAULT_CRYPTO_TTL_SECS: i64 = 30 * 60;

/// Default evidence window for fiat reservations. Bank transfers settle in
/// days, not minutes, so the fiat window is much longer.
pub const DEFAULT_FIAT_TTL_SECS: i64 = 3 * 24 * 60 * 60;

/// Maximum serialized size of free-form reservation metadata.
pub const MAX_METADATA_BYTES: usize = 4096;
