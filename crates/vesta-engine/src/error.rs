//! # Engine Error Types
//!
//! The error taxonomy of the allocation core.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Engine Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Validation    │  │    Conflict     │  │   Transient external    │ │
//! │  │  (never retry)  │  │  (never retry)  │  │  (bounded retry)        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │ InvalidEvidence │  │ CapacityExceeded│  │  RateUnavailable        │ │
//! │  │ InvalidPayload  │  │ AlreadyTerminal │  │  StaleRate              │ │
//! │  │ GatingDenied    │  │ ReservationExp. │  │                         │ │
//! │  │ KycRequired     │  │ SaleNotOpen     │  │                         │ │
//! │  │ RailNotAccepted │  │ NotFound        │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │ Authentication  │  │    Storage      │                              │
//! │  │  (fail closed)  │  │                 │                              │
//! │  │  Unauthorized   │  │  Database       │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation and Conflict errors go back to the immediate caller and are
//! never retried by the core. Transient errors may be retried a bounded
//! number of times before surfacing.

use thiserror::Error;

use vesta_core::{CoreError, KycTier, PaymentRail, ReservationStatus, ValidationError};
use vesta_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type covering the allocation core's failure taxonomy.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Validation Errors (caller's fault, never retried)
    // =========================================================================
    /// Evidence shape does not match the reservation's rail.
    #[error("Invalid evidence: {reason}")]
    InvalidEvidence { reason: String },

    /// Webhook payload could not be parsed into a reconciliation event.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Gating policy returned a terminal block.
    #[error("Reservation denied: {reason}")]
    GatingDenied { reason: String },

    /// Gating policy requires verification before this reservation can
    /// proceed. A deferral, not a denial.
    #[error("KYC verification at tier '{tier}' required before reserving")]
    KycRequired { tier: KycTier },

    /// The sale does not accept the requested payment rail.
    #[error("Sale does not accept the '{rail}' rail")]
    RailNotAccepted { rail: PaymentRail },

    /// The requested amount cannot be quoted (overflow or dust).
    #[error("Amount cannot be quoted: {reason}")]
    UnquotableAmount { reason: String },

    /// Input validation failure.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Conflict Errors (state precondition not met, never retried)
    // =========================================================================
    /// The request would push reservations past the sale's hard cap.
    #[error("Capacity exceeded: requested {requested_units} units, {available_units} available")]
    CapacityExceeded {
        requested_units: i64,
        available_units: i64,
    },

    /// The sale is outside its window or already closed.
    #[error("Sale {sale_id} is not open: {reason}")]
    SaleNotOpen { sale_id: String, reason: String },

    /// The reservation already reached a terminal status.
    #[error("Reservation {reservation_id} is already {status}")]
    AlreadyTerminal {
        reservation_id: String,
        status: ReservationStatus,
    },

    /// Confirmation arrived after the reservation expired. The event is
    /// recorded as a reconciliation anomaly before this error surfaces.
    #[error("Reservation {reservation_id} has expired")]
    ReservationExpired { reservation_id: String },

    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // =========================================================================
    // Transient External Errors (bounded retry may succeed)
    // =========================================================================
    /// No rate could be sourced for the requested asset pair.
    #[error("Rate unavailable: {0}")]
    RateUnavailable(String),

    /// The sourced rate is older than the freshness threshold.
    #[error("Rate is stale: {age_secs}s old, max {max_age_secs}s")]
    StaleRate { age_secs: i64, max_age_secs: i64 },

    // =========================================================================
    // Authentication
    // =========================================================================
    /// Missing or invalid shared-secret credential. Fail closed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // =========================================================================
    // Storage
    // =========================================================================
    /// Ledger store failure.
    #[error("Storage error: {0}")]
    Database(#[from] DbError),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::EvidenceMismatch { .. } | CoreError::IncompleteEvidence { .. } => {
                EngineError::InvalidEvidence {
                    reason: err.to_string(),
                }
            }
            CoreError::NonPositiveRate { .. } => EngineError::RateUnavailable(err.to_string()),
            CoreError::AmountOverflow | CoreError::QuantityTooSmall { .. } => {
                EngineError::UnquotableAmount {
                    reason: err.to_string(),
                }
            }
            CoreError::Validation(v) => EngineError::Validation(v),
        }
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl EngineError {
    /// True for transient external failures that a bounded retry may fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::RateUnavailable(_) | EngineError::StaleRate { .. }
        )
    }

    /// True for state-precondition conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::CapacityExceeded { .. }
                | EngineError::SaleNotOpen { .. }
                | EngineError::AlreadyTerminal { .. }
                | EngineError::ReservationExpired { .. }
                | EngineError::NotFound { .. }
        )
    }

    /// True for caller-input failures that will never succeed on retry.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidEvidence { .. }
                | EngineError::InvalidPayload(_)
                | EngineError::GatingDenied { .. }
                | EngineError::KycRequired { .. }
                | EngineError::RailNotAccepted { .. }
                | EngineError::UnquotableAmount { .. }
                | EngineError::Validation(_)
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
