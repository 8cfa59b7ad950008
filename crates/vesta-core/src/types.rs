//! # Domain Types
//!
//! Core domain types for the Vesta allocation ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Sale       │   │  Reservation    │   │  Distribution   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  capacity units │   │  sale_id (FK)   │   │  reservation_id │       │
//! │  │  reserved units │   │  status         │   │  destination    │       │
//! │  │  confirmed units│   │  quote (frozen) │   │  quantity_units │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  PaymentRail    │   │ReservationStatus│   │    Evidence     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Crypto         │   │  Pending        │   │  Crypto{chain,  │       │
//! │  │  Fiat           │   │  Confirmed      │   │         txhash} │       │
//! │  └─────────────────┘   │  Rejected       │   │  Fiat{confirm.  │       │
//! │                        │  Cancelled      │   │       id, ref}  │       │
//! │                        │  Expired        │   └─────────────────┘       │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## State Machine
//! `Pending` is the only non-terminal status. Every transition out of it is
//! one-way: a terminal reservation is append-only history and never reverts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::TokenAmount;
use crate::error::CoreError;

// =============================================================================
// Payment Rail
// =============================================================================

/// The payment channel used to settle a reservation.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRail {
    /// On-chain transfer, confirmed by transaction receipt.
    Crypto,
    /// Off-chain transfer through a payment processor.
    Fiat,
}

impl std::fmt::Display for PaymentRail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentRail::Crypto => write!(f, "crypto"),
            PaymentRail::Fiat => write!(f, "fiat"),
        }
    }
}

// =============================================================================
// Reservation Status
// =============================================================================

/// The status of a reservation.
///
/// All statuses except `Pending` are terminal.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding capacity, awaiting payment evidence.
    Pending,
    /// Payment confirmed; capacity permanently consumed.
    Confirmed,
    /// Provider reported failure; capacity returned.
    Rejected,
    /// Buyer withdrew; capacity returned.
    Cancelled,
    /// Evidence never arrived in time; capacity returned by the sweeper.
    Expired,
}

impl ReservationStatus {
    /// Returns true for every status except `Pending`.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }
}

impl Default for ReservationStatus {
    fn default() -> Self {
        ReservationStatus::Pending
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// KYC
// =============================================================================

/// Identity-assurance tier. Ordered: `None < Basic < Enhanced`.
///
/// Used both as a sale's requirement and as a buyer's verified tier.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycTier {
    None,
    Basic,
    Enhanced,
}

impl std::fmt::Display for KycTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KycTier::None => "none",
            KycTier::Basic => "basic",
            KycTier::Enhanced => "enhanced",
        };
        write!(f, "{}", s)
    }
}

/// Verification state reported by the external KYC subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycState {
    /// Buyer never started verification.
    Unverified,
    /// Verification submitted, review in progress.
    Pending,
    /// Verification passed at `KycStatus::tier`.
    Verified,
    /// Verification failed; terminal for gating purposes.
    Rejected,
}

/// A buyer's current KYC standing, consumed as a gating input.
///
/// The verification process itself is external; this core never drives it.
/// `restricted` carries the restriction-list lookup result, also owned by an
/// external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycStatus {
    /// Highest verified tier. Only meaningful when `state` is `Verified`.
    pub tier: KycTier,
    /// Verification state.
    pub state: KycState,
    /// Buyer appears on a restriction list.
    pub restricted: bool,
}

impl KycStatus {
    /// A buyer with no verification on file.
    pub const fn unverified() -> Self {
        KycStatus {
            tier: KycTier::None,
            state: KycState::Unverified,
            restricted: false,
        }
    }

    /// A buyer verified at the given tier.
    pub const fn verified(tier: KycTier) -> Self {
        KycStatus {
            tier,
            state: KycState::Verified,
            restricted: false,
        }
    }
}

/// The gating policy's verdict for a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatingDecision {
    /// Proceed with reservation creation.
    Allow,
    /// Defer until the buyer completes verification at this tier.
    RequireKyc(KycTier),
    /// Terminal denial (restriction list, rejected KYC).
    Block { reason: String },
}

// =============================================================================
// Payment Evidence
// =============================================================================

/// Rail-specific proof of payment.
///
/// Modeled as a tagged variant, not subclassing: each rail has a fixed,
/// closed set of required fields validated by [`Evidence::matches_rail`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rail", rename_all = "snake_case")]
pub enum Evidence {
    /// On-chain confirmation: which chain, which transaction.
    Crypto { chain_id: u64, tx_hash: String },
    /// Off-chain confirmation from a payment provider.
    Fiat {
        confirmation_id: String,
        /// Provider-side reference to the payment evidence document.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receipt_ref: Option<String>,
    },
}

impl Evidence {
    /// Returns the rail this evidence belongs to.
    pub const fn rail(&self) -> PaymentRail {
        match self {
            Evidence::Crypto { .. } => PaymentRail::Crypto,
            Evidence::Fiat { .. } => PaymentRail::Fiat,
        }
    }

    /// Validates the evidence shape against a reservation's rail.
    ///
    /// ## Rules
    /// - CRYPTO requires a non-empty transaction hash
    /// - FIAT requires a non-empty confirmation id
    /// - the evidence rail must equal the reservation rail
    pub fn matches_rail(&self, rail: PaymentRail) -> Result<(), CoreError> {
        if self.rail() != rail {
            return Err(CoreError::EvidenceMismatch {
                expected: rail,
                got: self.rail(),
            });
        }

        match self {
            Evidence::Crypto { tx_hash, .. } => {
                if tx_hash.trim().is_empty() {
                    return Err(CoreError::IncompleteEvidence {
                        reason: "tx_hash is empty".to_string(),
                    });
                }
            }
            Evidence::Fiat {
                confirmation_id, ..
            } => {
                if confirmation_id.trim().is_empty() {
                    return Err(CoreError::IncompleteEvidence {
                        reason: "confirmation_id is empty".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Rate Quote
// =============================================================================

/// A frozen price/quantity conversion captured at reservation creation.
///
/// ## Snapshot Pattern
/// The quote is embedded into the reservation row when it is created, so
/// later rate movement cannot retroactively change what the buyer owes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateQuote {
    /// Asset the buyer pays with (e.g. "USD", "ETH").
    pub source_asset: String,
    /// Token being sold.
    pub target_asset: String,
    /// Source major units per whole token, scaled by 10^rate_decimals.
    pub rate_scaled: i64,
    /// Precision of `rate_scaled` (always [`crate::RATE_DECIMALS`] today,
    /// recorded explicitly so stored quotes remain self-describing).
    pub rate_decimals: u32,
    /// Management fee loaded into the rate, in basis points.
    pub fee_bps: u32,
    /// Whether `rate_scaled` already includes the fee.
    pub fee_adjusted: bool,
    /// What the buyer pays, in source minor units.
    pub source_amount_minor: i64,
    /// What the buyer receives, in token base units.
    pub token_units: i64,
    /// When the quote was computed.
    pub computed_at: DateTime<Utc>,
}

// =============================================================================
// Sale
// =============================================================================

/// A time-boxed, capacity-limited offer to sell a fixed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Token being sold.
    pub token_symbol: String,

    /// Decimal precision of the token (base units per token = 10^decimals).
    pub token_decimals: u8,

    /// Hard cap, in token base units.
    pub total_capacity_units: i64,

    /// Sum of PENDING reservation quantities.
    pub reserved_units: i64,

    /// Sum of CONFIRMED reservation quantities.
    pub confirmed_units: i64,

    /// Base listing price of one whole token, in `price_currency` minor units.
    pub unit_price_minor: i64,

    /// Currency the listing price is denominated in.
    pub price_currency: String,

    /// Start of the sale window.
    pub starts_at: DateTime<Utc>,

    /// End of the sale window.
    pub ends_at: DateTime<Utc>,

    /// KYC tier required to participate at all.
    pub kyc_requirement: KycTier,

    /// Payment rails this sale accepts.
    pub accepted_rails: Vec<PaymentRail>,

    /// Set once the sweeper closes the sale to new reservations.
    pub closed_at: Option<DateTime<Utc>>,

    /// When the sale was created.
    pub created_at: DateTime<Utc>,

    /// When the sale was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    /// Capacity still available to new reservations, in base units.
    #[inline]
    pub fn available_units(&self) -> i64 {
        self.total_capacity_units - self.reserved_units - self.confirmed_units
    }

    /// Whether the sale accepts new reservations at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.closed_at.is_none() && now >= self.starts_at && now < self.ends_at
    }

    /// Whether the sale accepts the given payment rail.
    pub fn accepts(&self, rail: PaymentRail) -> bool {
        self.accepted_rails.contains(&rail)
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// A buyer's in-flight or resolved claim against a sale's capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub sale_id: String,
    /// Opaque external buyer identity.
    pub buyer_id: String,
    pub rail: PaymentRail,
    /// Requested quantity, in token base units.
    pub quantity_units: i64,
    /// Quote frozen at creation time.
    pub quote: RateQuote,
    pub status: ReservationStatus,
    /// Payment evidence, recorded on confirmation.
    pub evidence: Option<Evidence>,
    /// Why the reservation was rejected, when it was.
    pub rejection_reason: Option<String>,
    /// Delivery destination recorded for the distribution intent.
    pub destination: Option<String>,
    /// Free-form metadata supplied at creation.
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Absolute expiry; past this point only the expiry transition applies.
    pub expires_at: DateTime<Utc>,
    /// When the reservation reached a terminal status.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Requested quantity as a [`TokenAmount`].
    #[inline]
    pub fn quantity(&self) -> TokenAmount {
        TokenAmount::from_units(self.quantity_units)
    }

    /// A PENDING reservation past its expiry timestamp.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now > self.expires_at
    }
}

// =============================================================================
// Distribution
// =============================================================================

/// The recorded intent to deliver tokens for a confirmed reservation.
///
/// Created exactly once, in the same transaction as the confirmation, and
/// never mutated afterward. Delivery execution is an external collaborator
/// that consumes these rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
    pub id: String,
    pub reservation_id: String,
    pub destination: String,
    pub quantity_units: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Reconciliation Anomaly
// =============================================================================

/// Classification of a manual-reconciliation signal.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Confirmation evidence arrived for a reservation that had expired.
    /// Money may have moved for a slot that was already released.
    LateConfirmation,
    /// Evidence arrived that conflicts with what is already recorded.
    ConflictingEvidence,
}

/// A persisted manual-reconciliation signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationAnomaly {
    pub id: String,
    pub reservation_id: String,
    pub kind: AnomalyKind,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sale_at(now: DateTime<Utc>) -> Sale {
        Sale {
            id: "sale-1".to_string(),
            token_symbol: "VST".to_string(),
            token_decimals: 6,
            total_capacity_units: 1_000_000_000,
            reserved_units: 0,
            confirmed_units: 0,
            unit_price_minor: 100,
            price_currency: "USD".to_string(),
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::hours(1),
            kyc_requirement: KycTier::None,
            accepted_rails: vec![PaymentRail::Crypto, PaymentRail::Fiat],
            closed_at: None,
            created_at: now - Duration::hours(2),
            updated_at: now - Duration::hours(2),
        }
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Rejected.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }

    #[test]
    fn test_kyc_tier_ordering() {
        assert!(KycTier::None < KycTier::Basic);
        assert!(KycTier::Basic < KycTier::Enhanced);
    }

    #[test]
    fn test_sale_window() {
        let now = Utc::now();
        let mut sale = sale_at(now);

        assert!(sale.is_open(now));
        assert!(!sale.is_open(now + Duration::hours(2)));
        assert!(!sale.is_open(now - Duration::hours(2)));

        sale.closed_at = Some(now);
        assert!(!sale.is_open(now));
    }

    #[test]
    fn test_sale_available_units() {
        let now = Utc::now();
        let mut sale = sale_at(now);
        sale.reserved_units = 300;
        sale.confirmed_units = 200;
        assert_eq!(sale.available_units(), 1_000_000_000 - 500);
    }

    #[test]
    fn test_evidence_rail_check() {
        let crypto = Evidence::Crypto {
            chain_id: 1,
            tx_hash: "0xabc".to_string(),
        };
        assert!(crypto.matches_rail(PaymentRail::Crypto).is_ok());
        assert!(crypto.matches_rail(PaymentRail::Fiat).is_err());

        let fiat = Evidence::Fiat {
            confirmation_id: "pi_123".to_string(),
            receipt_ref: None,
        };
        assert!(fiat.matches_rail(PaymentRail::Fiat).is_ok());
        assert!(fiat.matches_rail(PaymentRail::Crypto).is_err());
    }

    #[test]
    fn test_evidence_completeness() {
        let empty_hash = Evidence::Crypto {
            chain_id: 1,
            tx_hash: "  ".to_string(),
        };
        assert!(empty_hash.matches_rail(PaymentRail::Crypto).is_err());

        let empty_confirmation = Evidence::Fiat {
            confirmation_id: String::new(),
            receipt_ref: None,
        };
        assert!(empty_confirmation.matches_rail(PaymentRail::Fiat).is_err());
    }

    #[test]
    fn test_evidence_serde_tagging() {
        let evidence = Evidence::Crypto {
            chain_id: 137,
            tx_hash: "0xdeadbeef".to_string(),
        };
        let json = serde_json::to_string(&evidence).unwrap();
        assert!(json.contains("\"rail\":\"crypto\""));

        let back: Evidence = serde_json::from_str(&json).unwrap();
        assert_eq!(back, evidence);
    }

    #[test]
    fn test_reservation_past_expiry() {
        let now = Utc::now();
        let quote = RateQuote {
            source_asset: "USD".to_string(),
            target_asset: "VST".to_string(),
            rate_scaled: 100_000_000,
            rate_decimals: 8,
            fee_bps: 0,
            fee_adjusted: false,
            source_amount_minor: 100,
            token_units: 1_000_000,
            computed_at: now,
        };
        let mut reservation = Reservation {
            id: "res-1".to_string(),
            sale_id: "sale-1".to_string(),
            buyer_id: "buyer-1".to_string(),
            rail: PaymentRail::Crypto,
            quantity_units: 1_000_000,
            quote,
            status: ReservationStatus::Pending,
            evidence: None,
            rejection_reason: None,
            destination: None,
            metadata: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::minutes(30),
            resolved_at: None,
        };

        assert!(!reservation.is_past_expiry(now));
        assert!(reservation.is_past_expiry(now + Duration::minutes(31)));

        // Terminal reservations are never "past expiry" for transition purposes.
        reservation.status = ReservationStatus::Expired;
        assert!(!reservation.is_past_expiry(now + Duration::minutes(31)));
    }
}
