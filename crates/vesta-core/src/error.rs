//! # Error Types
//!
//! Domain-specific error types for vesta-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  vesta-core errors (this file)                                         │
//! │  ├── CoreError        - Pure domain failures (evidence, quote math)    │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  vesta-db errors (separate crate)                                      │
//! │  └── DbError          - Ledger store failures                          │
//! │                                                                         │
//! │  vesta-engine errors (separate crate)                                  │
//! │  └── EngineError      - State machine / gateway / oracle failures      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::PaymentRail;

// =============================================================================
// Core Error
// =============================================================================

/// Pure domain-logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Evidence carries the wrong rail for the reservation.
    #[error("evidence is for rail '{got}', reservation expects '{expected}'")]
    EvidenceMismatch {
        expected: PaymentRail,
        got: PaymentRail,
    },

    /// Evidence has the right rail but a required field is missing/empty.
    #[error("evidence is incomplete: {reason}")]
    IncompleteEvidence { reason: String },

    /// The rate feed produced a rate that cannot price anything.
    #[error("rate must be positive, got scaled value {rate_scaled}")]
    NonPositiveRate { rate_scaled: i64 },

    /// Quote arithmetic overflowed its i128 intermediates.
    #[error("amount conversion overflowed")]
    AmountOverflow,

    /// The requested amount converts to zero token base units.
    #[error("requested amount of {amount_minor} {source_asset} converts to zero token units")]
    QuantityTooSmall {
        amount_minor: i64,
        source_asset: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur when caller input doesn't meet requirements, before any
/// business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, bad asset code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
