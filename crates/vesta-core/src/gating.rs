//! # Gating Policy
//!
//! Pure predicate evaluated before reservation creation: given a buyer's KYC
//! standing, the sale's requirement, and the requested amount, decide
//! ALLOW / REQUIRE_KYC / BLOCK.
//!
//! ## Decision Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  evaluate(status, requirement, value, config)                           │
//! │                                                                         │
//! │  restricted?            ──► Block  (restriction list is terminal)      │
//! │  kyc rejected?          ──► Block                                       │
//! │                                                                         │
//! │  required = max(sale requirement,                                       │
//! │                 Enhanced if value >= enhanced_threshold_minor)          │
//! │                                                                         │
//! │  required == None       ──► Allow                                       │
//! │  verified at required?  ──► Allow                                       │
//! │  otherwise              ──► RequireKyc(required)  (defer, don't block)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Thresholds are configuration, not hard-coded branches, so operators can
//! retune without a code change.

use serde::{Deserialize, Serialize};

use crate::types::{GatingDecision, KycState, KycStatus, KycTier};

// =============================================================================
// Configuration
// =============================================================================

/// Operator-tunable gating thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatingConfig {
    /// Request value (in price-currency minor units) at or above which the
    /// enhanced tier is required regardless of the sale's own requirement.
    pub enhanced_threshold_minor: i64,
}

impl Default for GatingConfig {
    fn default() -> Self {
        GatingConfig {
            // $10,000.00 - the customary enhanced-due-diligence line
            enhanced_threshold_minor: 1_000_000,
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluates the gating policy for one reservation attempt.
///
/// Pure and side-effect-free: the KYC status and restriction flag are
/// inputs supplied by the caller (the verification subsystem owns them).
pub fn evaluate(
    status: &KycStatus,
    requirement: KycTier,
    request_value_minor: i64,
    config: &GatingConfig,
) -> GatingDecision {
    if status.restricted {
        return GatingDecision::Block {
            reason: "buyer is on a restriction list".to_string(),
        };
    }

    if status.state == KycState::Rejected {
        return GatingDecision::Block {
            reason: "buyer's identity verification was rejected".to_string(),
        };
    }

    let mut required = requirement;
    if request_value_minor >= config.enhanced_threshold_minor {
        required = required.max(KycTier::Enhanced);
    }

    if required == KycTier::None {
        return GatingDecision::Allow;
    }

    // A tier only counts once verification has actually completed.
    if status.state == KycState::Verified && status.tier >= required {
        return GatingDecision::Allow;
    }

    GatingDecision::RequireKyc(required)
}

// =============================================================================
// Unit Tests
// =============================================================================
