//! # Allocation Engine
//!
//! The reservation state machine: creates reservations against a sale's
//! capped capacity, transitions them through confirmation / rejection /
//! cancellation / expiry, and keeps the sale's capacity counters correct
//! at every commit point.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │                     ┌──────────────► CONFIRMED   reserved -= q          │
//! │                     │   confirm()                confirmed += q         │
//! │                     │                            + distribution intent  │
//! │                     │                                                   │
//! │   create() ──► PENDING ─────────────► REJECTED   reserved -= q          │
//! │   reserved += q     │   reject()                                        │
//! │                     │                                                   │
//! │                     ├──────────────► CANCELLED   reserved -= q          │
//! │                     │   cancel()                                        │
//! │                     │                                                   │
//! │                     └──────────────► EXPIRED     reserved -= q          │
//! │                         expire()                                        │
//! │                                                                         │
//! │  All four right-hand states are terminal. Each transition is ONE        │
//! │  guarded transaction in vesta-db; a lost race re-reads and maps the     │
//! │  winner's state into the error taxonomy.                                │
//! │                                                                         │
//! │  TIE-BREAK: confirmation wins iff it commits before the expiry          │
//! │  transition. Once EXPIRED is durable, a late confirmation fails with    │
//! │  ReservationExpired and is recorded as a reconciliation anomaly -       │
//! │  funds may have moved for a slot that was already released.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vesta_core::{
    amount::pow10, gating, validation, AnomalyKind, Distribution, Evidence, GatingDecision,
    KycStatus, PaymentRail, ReconciliationAnomaly, Reservation, ReservationStatus, Sale,
};
use vesta_db::Database;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::oracle::{PriceOracle, RateSource};

// =============================================================================
// Reservation Request
// =============================================================================

/// An inbound reservation request, as handed over by the purchase surface.
///
/// The buyer's KYC standing is supplied by the caller: the verification
/// subsystem owns that data and this core only consumes it.
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub sale_id: String,
    pub buyer_id: String,
    pub rail: PaymentRail,
    /// Asset the buyer pays with.
    pub source_asset: String,
    /// Requested spend, in source minor units.
    pub source_amount_minor: i64,
    /// Decimal precision of the source asset.
    pub source_decimals: u8,
    /// Buyer's current KYC standing.
    pub kyc: KycStatus,
    /// Optional delivery destination for the eventual distribution.
    pub destination: Option<String>,
    /// Free-form metadata stored on the reservation.
    pub metadata: Option<serde_json::Value>,
}

// =============================================================================
// Allocation Engine
// =============================================================================

/// The allocation engine. The only component that drives reservation
/// transitions; everything else (gateway, sweeper, poller) funnels through
/// its operations.
pub struct AllocationEngine<S> {
    db: Database,
    oracle: PriceOracle<S>,
    config: Arc<EngineConfig>,
}

impl<S: RateSource> AllocationEngine<S> {
    /// Creates a new engine over the ledger and oracle.
    pub fn new(db: Database, oracle: PriceOracle<S>, config: Arc<EngineConfig>) -> Self {
        AllocationEngine { db, oracle, config }
    }

    /// The ledger handle this engine writes through.
    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // create_reservation
    // =========================================================================

    /// Creates a PENDING reservation, freezing the quote and decrementing
    /// available capacity atomically.
    ///
    /// ## Failure kinds
    /// - `NotFound` - unknown sale
    /// - `SaleNotOpen` - outside the window, or closed by the sweeper
    /// - `RailNotAccepted` - sale does not take this rail
    /// - `RateUnavailable` / `StaleRate` - oracle failure after bounded retry
    /// - `GatingDenied` / `KycRequired` - gating policy verdicts
    /// - `CapacityExceeded` - the guarded reserve lost to the hard cap
    pub async fn create_reservation(
        &self,
        request: ReservationRequest,
    ) -> EngineResult<Reservation> {
        validation::validate_uuid("sale_id", &request.sale_id)?;
        validation::validate_buyer_id(&request.buyer_id)?;
        validation::validate_asset_code("source_asset", &request.source_asset)?;
        validation::validate_source_amount(request.source_amount_minor)?;
        validation::validate_decimals("source_decimals", request.source_decimals)?;
        validation::validate_destination(request.destination.as_deref())?;
        validation::validate_metadata(request.metadata.as_ref())?;

        let now = Utc::now();

        let sale = self
            .db
            .sales()
            .get_by_id(&request.sale_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Sale",
                id: request.sale_id.clone(),
            })?;

        if !sale.is_open(now) {
            let reason = if sale.closed_at.is_some() {
                "closed".to_string()
            } else if now < sale.starts_at {
                "not started".to_string()
            } else {
                "window has ended".to_string()
            };
            return Err(EngineError::SaleNotOpen {
                sale_id: sale.id,
                reason,
            });
        }

        if !sale.accepts(request.rail) {
            return Err(EngineError::RailNotAccepted { rail: request.rail });
        }

        // Quote first: the gating threshold is denominated in the sale's
        // price currency, so the request's worth is only known post-quote.
        let quote = self.quote_with_retry(&request, &sale).await?;
        let request_value_minor = sale_value_minor(&sale, quote.token_units)?;

        match gating::evaluate(
            &request.kyc,
            sale.kyc_requirement,
            request_value_minor,
            &self.config.gating,
        ) {
            GatingDecision::Allow => {}
            GatingDecision::RequireKyc(tier) => {
                debug!(buyer_id = %request.buyer_id, %tier, "Reservation deferred pending KYC");
                return Err(EngineError::KycRequired { tier });
            }
            GatingDecision::Block { reason } => {
                warn!(buyer_id = %request.buyer_id, %reason, "Reservation blocked by gating policy");
                return Err(EngineError::GatingDenied { reason });
            }
        }

        let reservation = Reservation {
            id: Uuid::new_v4().to_string(),
            sale_id: sale.id.clone(),
            buyer_id: request.buyer_id.clone(),
            rail: request.rail,
            quantity_units: quote.token_units,
            quote,
            status: ReservationStatus::Pending,
            evidence: None,
            rejection_reason: None,
            destination: request.destination.clone(),
            metadata: request.metadata.clone(),
            created_at: now,
            updated_at: now,
            expires_at: now + self.config.ttl_for(request.rail),
            resolved_at: None,
        };

        if !self.db.reservations().create_pending(&reservation).await? {
            // The guard refused inside the store; re-read for an accurate
            // availability figure in the error.
            let sale = self
                .db
                .sales()
                .get_by_id(&reservation.sale_id)
                .await?
                .ok_or_else(|| EngineError::NotFound {
                    entity: "Sale",
                    id: reservation.sale_id.clone(),
                })?;
            return Err(EngineError::CapacityExceeded {
                requested_units: reservation.quantity_units,
                available_units: sale.available_units(),
            });
        }

        info!(
            reservation_id = %reservation.id,
            sale_id = %reservation.sale_id,
            buyer_id = %reservation.buyer_id,
            rail = %reservation.rail,
            quantity = reservation.quantity_units,
            expires_at = %reservation.expires_at,
            "Reservation created"
        );

        Ok(reservation)
    }

    /// Quotes through the oracle, retrying transient failures a bounded
    /// number of times.
    async fn quote_with_retry(
        &self,
        request: &ReservationRequest,
        sale: &Sale,
    ) -> EngineResult<vesta_core::RateQuote> {
        let mut attempt = 0u32;
        loop {
            match self
                .oracle
                .quote(
                    &request.source_asset,
                    &sale.token_symbol,
                    request.source_amount_minor,
                    request.source_decimals,
                    sale.token_decimals,
                )
                .await
            {
                Ok(quote) => return Ok(quote),
                Err(e) if e.is_transient() && attempt < self.config.rate_max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max = self.config.rate_max_retries,
                        error = %e,
                        "Transient oracle failure, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(
                        self.config.rate_retry_delay_ms,
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // =========================================================================
    // confirm
    // =========================================================================

    /// Confirms a PENDING reservation with payment evidence.
    ///
    /// Idempotent: re-confirming an already-CONFIRMED reservation with
    /// identical evidence is a no-op success, because external callbacks
    /// are delivered at-least-once.
    pub async fn confirm(
        &self,
        reservation_id: &str,
        evidence: Evidence,
    ) -> EngineResult<Reservation> {
        let repo = self.db.reservations();
        let mut reservation = self.load_reservation(reservation_id).await?;

        loop {
            match reservation.status {
                ReservationStatus::Confirmed => {
                    return if reservation.evidence.as_ref() == Some(&evidence) {
                        debug!(reservation_id, "Duplicate confirmation replayed; no-op");
                        Ok(reservation)
                    } else {
                        self.record_anomaly(
                            &reservation,
                            AnomalyKind::ConflictingEvidence,
                            &evidence,
                        )
                        .await?;
                        Err(EngineError::AlreadyTerminal {
                            reservation_id: reservation.id,
                            status: ReservationStatus::Confirmed,
                        })
                    };
                }

                ReservationStatus::Rejected | ReservationStatus::Cancelled => {
                    return Err(EngineError::AlreadyTerminal {
                        reservation_id: reservation.id,
                        status: reservation.status,
                    });
                }

                ReservationStatus::Expired => {
                    // The slot was already released; surface, don't swallow.
                    self.record_anomaly(&reservation, AnomalyKind::LateConfirmation, &evidence)
                        .await?;
                    return Err(EngineError::ReservationExpired {
                        reservation_id: reservation.id,
                    });
                }

                ReservationStatus::Pending => {
                    evidence.matches_rail(reservation.rail)?;

                    let now = Utc::now();
                    if now > reservation.expires_at {
                        // Evidence arrived too late: drive the expiry
                        // transition instead of confirming.
                        if repo
                            .commit_release(&reservation, ReservationStatus::Expired, None, now)
                            .await?
                        {
                            self.record_anomaly(
                                &reservation,
                                AnomalyKind::LateConfirmation,
                                &evidence,
                            )
                            .await?;
                            return Err(EngineError::ReservationExpired {
                                reservation_id: reservation.id,
                            });
                        }
                        // Lost to a concurrent transition; re-read and resolve.
                        reservation = self.load_reservation(reservation_id).await?;
                        continue;
                    }

                    let distribution = Distribution {
                        id: Uuid::new_v4().to_string(),
                        reservation_id: reservation.id.clone(),
                        destination: reservation
                            .destination
                            .clone()
                            .unwrap_or_else(|| reservation.buyer_id.clone()),
                        quantity_units: reservation.quantity_units,
                        created_at: now,
                    };

                    if repo
                        .commit_confirm(&reservation, &evidence, &distribution, now)
                        .await?
                    {
                        info!(
                            reservation_id = %reservation.id,
                            sale_id = %reservation.sale_id,
                            quantity = reservation.quantity_units,
                            "Reservation confirmed, distribution intent emitted"
                        );
                        return self.load_reservation(reservation_id).await;
                    }

                    // Lost the race; the winner's state decides the outcome.
                    reservation = self.load_reservation(reservation_id).await?;
                }
            }
        }
    }

    // =========================================================================
    // reject / cancel
    // =========================================================================

    /// Rejects a PENDING reservation (provider reported failure), returning
    /// its capacity. Idempotent against repeated identical calls.
    pub async fn reject(&self, reservation_id: &str, reason: &str) -> EngineResult<Reservation> {
        self.release(
            reservation_id,
            ReservationStatus::Rejected,
            Some(reason),
            "Reservation rejected",
        )
        .await
    }

    /// Cancels a PENDING reservation (buyer-initiated), returning its
    /// capacity. Idempotent against repeated calls.
    pub async fn cancel(&self, reservation_id: &str) -> EngineResult<Reservation> {
        self.release(
            reservation_id,
            ReservationStatus::Cancelled,
            None,
            "Reservation cancelled",
        )
        .await
    }

    async fn release(
        &self,
        reservation_id: &str,
        to_status: ReservationStatus,
        reason: Option<&str>,
        log_line: &'static str,
    ) -> EngineResult<Reservation> {
        let repo = self.db.reservations();
        let mut reservation = self.load_reservation(reservation_id).await?;

        loop {
            if reservation.status == to_status {
                let identical = match to_status {
                    ReservationStatus::Rejected => {
                        reservation.rejection_reason.as_deref() == reason
                    }
                    _ => true,
                };
                if identical {
                    debug!(reservation_id, status = %to_status, "Duplicate release replayed; no-op");
                    return Ok(reservation);
                }
                return Err(EngineError::AlreadyTerminal {
                    reservation_id: reservation.id,
                    status: reservation.status,
                });
            }

            if reservation.status.is_terminal() {
                return Err(EngineError::AlreadyTerminal {
                    reservation_id: reservation.id,
                    status: reservation.status,
                });
            }

            let now = Utc::now();
            if repo
                .commit_release(&reservation, to_status, reason, now)
                .await?
            {
                info!(
                    reservation_id = %reservation.id,
                    sale_id = %reservation.sale_id,
                    quantity = reservation.quantity_units,
                    status = %to_status,
                    "{}", log_line
                );
                return self.load_reservation(reservation_id).await;
            }

            reservation = self.load_reservation(reservation_id).await?;
        }
    }

    // =========================================================================
    // expire
    // =========================================================================

    /// Expires a PENDING reservation past its expiry timestamp, returning
    /// its capacity.
    ///
    /// System-initiated (the sweeper is the only caller in steady state).
    /// Returns whether THIS call performed the transition; a reservation
    /// that is already terminal - or not yet due - is a silent no-op, so
    /// overlapping sweeps can never double-return capacity.
    pub async fn expire(&self, reservation_id: &str) -> EngineResult<bool> {
        let reservation = self.load_reservation(reservation_id).await?;

        if reservation.status.is_terminal() {
            return Ok(false);
        }

        let now = Utc::now();
        if now <= reservation.expires_at {
            return Ok(false);
        }

        let expired = self
            .db
            .reservations()
            .commit_release(&reservation, ReservationStatus::Expired, None, now)
            .await?;

        if expired {
            info!(
                reservation_id = %reservation.id,
                sale_id = %reservation.sale_id,
                quantity = reservation.quantity_units,
                "Reservation expired, capacity returned"
            );
        }

        Ok(expired)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load_reservation(&self, reservation_id: &str) -> EngineResult<Reservation> {
        self.db
            .reservations()
            .get_by_id(reservation_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Reservation",
                id: reservation_id.to_string(),
            })
    }

    async fn record_anomaly(
        &self,
        reservation: &Reservation,
        kind: AnomalyKind,
        evidence: &Evidence,
    ) -> EngineResult<()> {
        let detail = serde_json::to_string(evidence)
            .unwrap_or_else(|_| "unserializable evidence".to_string());

        self.db
            .anomalies()
            .insert(&ReconciliationAnomaly {
                id: Uuid::new_v4().to_string(),
                reservation_id: reservation.id.clone(),
                kind,
                detail,
                created_at: Utc::now(),
            })
            .await?;

        Ok(())
    }
}

/// The worth of `token_units` at the sale's listing price, in price-currency
/// minor units. Used as the gating threshold input.
fn sale_value_minor(sale: &Sale, token_units: i64) -> EngineResult<i64> {
    let value = token_units as i128 * sale.unit_price_minor as i128
        / pow10(sale.token_decimals as u32);
    i64::try_from(value).map_err(|_| EngineError::UnquotableAmount {
        reason: "request value overflows the price currency".to_string(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use vesta_core::{KycTier, RateData};
    use vesta_db::DbConfig;

    use crate::oracle::{FixedRateSource, OracleConfig};

    const RATE_ONE: i64 = 100_000_000; // 1.00 USD per token

    /// Opt-in test diagnostics: RUST_LOG=debug cargo test -p vesta-engine
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    struct Harness {
        engine: Arc<AllocationEngine<Arc<FixedRateSource>>>,
        db: Database,
        source: Arc<FixedRateSource>,
    }

    async fn harness(config: EngineConfig) -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let source = Arc::new(FixedRateSource::new());
        source
            .set_rate(
                "USD",
                "VST",
                RateData {
                    rate_scaled: RATE_ONE,
                    fetched_at: Utc::now(),
                },
            )
            .await;

        let oracle = PriceOracle::new(
            source.clone(),
            OracleConfig {
                fee: config.management_fee(),
                max_age: chrono::Duration::seconds(config.rate_max_age_secs),
                fetch_timeout: config.rate_timeout(),
            },
        );
        let engine = Arc::new(AllocationEngine::new(
            db.clone(),
            oracle,
            Arc::new(config),
        ));

        Harness { engine, db, source }
    }

    fn sale(now: DateTime<Utc>, capacity_tokens: i64) -> Sale {
        Sale {
            id: Uuid::new_v4().to_string(),
            token_symbol: "VST".to_string(),
            token_decimals: 6,
            total_capacity_units: capacity_tokens * 1_000_000,
            reserved_units: 0,
            confirmed_units: 0,
            unit_price_minor: 100, // $1.00 per token
            price_currency: "USD".to_string(),
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::hours(1),
            kyc_requirement: KycTier::None,
            accepted_rails: vec![PaymentRail::Crypto, PaymentRail::Fiat],
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn request(sale_id: &str, amount_minor: i64, rail: PaymentRail) -> ReservationRequest {
        ReservationRequest {
            sale_id: sale_id.to_string(),
            buyer_id: "buyer-a".to_string(),
            rail,
            source_asset: "USD".to_string(),
            source_amount_minor: amount_minor,
            source_decimals: 2,
            kyc: KycStatus::unverified(),
            destination: Some("0xbuyer".to_string()),
            metadata: None,
        }
    }

    fn crypto_evidence() -> Evidence {
        Evidence::Crypto {
            chain_id: 1,
            tx_hash: "0xabc123".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_reservation_freezes_quote_and_reserves() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let sale = sale(now, 1_000);
        h.db.sales().insert(&sale).await.unwrap();

        // $200.00 at 1.00/token → 200 tokens
        let reservation = h
            .engine
            .create_reservation(request(&sale.id, 20_000, PaymentRail::Crypto))
            .await
            .unwrap();

        assert_eq!(reservation.status, ReservationStatus::Pending);
        assert_eq!(reservation.quantity_units, 200_000_000);
        assert_eq!(reservation.quote.rate_scaled, RATE_ONE);

        let sale = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 200_000_000);
        assert_eq!(sale.confirmed_units, 0);

        // Rate moves AFTER creation: the frozen quote must not change.
        h.source
            .set_rate(
                "USD",
                "VST",
                RateData {
                    rate_scaled: 2 * RATE_ONE,
                    fetched_at: Utc::now(),
                },
            )
            .await;
        let stored = h
            .db
            .reservations()
            .get_by_id(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.quote.rate_scaled, RATE_ONE);
        assert_eq!(stored.quote.token_units, 200_000_000);
    }

    #[tokio::test]
    async fn test_capacity_exhaustion() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let sale = sale(now, 100);
        h.db.sales().insert(&sale).await.unwrap();

        // 90 tokens reserved
        h.engine
            .create_reservation(request(&sale.id, 9_000, PaymentRail::Fiat))
            .await
            .unwrap();

        // 15 more would exceed the 100 cap
        let err = h
            .engine
            .create_reservation(request(&sale.id, 1_500, PaymentRail::Fiat))
            .await
            .unwrap_err();
        match err {
            EngineError::CapacityExceeded {
                requested_units,
                available_units,
            } => {
                assert_eq!(requested_units, 15_000_000);
                assert_eq!(available_units, 10_000_000);
            }
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }

        // 10 exactly fills the cap
        h.engine
            .create_reservation(request(&sale.id, 1_000, PaymentRail::Fiat))
            .await
            .unwrap();
        let sale = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 100_000_000);
    }

    #[tokio::test]
    async fn test_sale_window_checks() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();

        let mut not_started = sale(now, 100);
        not_started.starts_at = now + Duration::hours(1);
        not_started.ends_at = now + Duration::hours(2);
        h.db.sales().insert(&not_started).await.unwrap();

        let err = h
            .engine
            .create_reservation(request(&not_started.id, 100, PaymentRail::Fiat))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SaleNotOpen { .. }));

        let mut closed = sale(now, 100);
        closed.closed_at = Some(now);
        h.db.sales().insert(&closed).await.unwrap();

        let err = h
            .engine
            .create_reservation(request(&closed.id, 100, PaymentRail::Fiat))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SaleNotOpen { .. }));
    }

    #[tokio::test]
    async fn test_rail_not_accepted() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let mut fiat_only = sale(now, 100);
        fiat_only.accepted_rails = vec![PaymentRail::Fiat];
        h.db.sales().insert(&fiat_only).await.unwrap();

        let err = h
            .engine
            .create_reservation(request(&fiat_only.id, 100, PaymentRail::Crypto))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RailNotAccepted { .. }));
    }

    #[tokio::test]
    async fn test_gating_defers_and_blocks() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let mut gated = sale(now, 100_000);
        gated.kyc_requirement = KycTier::Basic;
        h.db.sales().insert(&gated).await.unwrap();

        // unverified buyer → deferral
        let err = h
            .engine
            .create_reservation(request(&gated.id, 100, PaymentRail::Fiat))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::KycRequired {
                tier: KycTier::Basic
            }
        ));

        // restricted buyer → terminal denial
        let mut req = request(&gated.id, 100, PaymentRail::Fiat);
        req.kyc = KycStatus {
            tier: KycTier::Enhanced,
            state: vesta_core::KycState::Verified,
            restricted: true,
        };
        let err = h.engine.create_reservation(req).await.unwrap_err();
        assert!(matches!(err, EngineError::GatingDenied { .. }));

        // verified buyer → allowed
        let mut req = request(&gated.id, 100, PaymentRail::Fiat);
        req.kyc = KycStatus::verified(KycTier::Basic);
        h.engine.create_reservation(req).await.unwrap();
    }

    #[tokio::test]
    async fn test_gating_threshold_uses_sale_value() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let open = sale(now, 1_000_000);
        h.db.sales().insert(&open).await.unwrap();

        // $10,000.00 crosses the default enhanced threshold
        let err = h
            .engine
            .create_reservation(request(&open.id, 1_000_000, PaymentRail::Fiat))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::KycRequired {
                tier: KycTier::Enhanced
            }
        ));
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let sale = sale(now, 1_000);
        h.db.sales().insert(&sale).await.unwrap();

        let reservation = h
            .engine
            .create_reservation(request(&sale.id, 20_000, PaymentRail::Crypto))
            .await
            .unwrap();

        let first = h
            .engine
            .confirm(&reservation.id, crypto_evidence())
            .await
            .unwrap();
        assert_eq!(first.status, ReservationStatus::Confirmed);

        // identical replay is a no-op success
        let second = h
            .engine
            .confirm(&reservation.id, crypto_evidence())
            .await
            .unwrap();
        assert_eq!(second.status, ReservationStatus::Confirmed);

        // confirmed is not double-counted
        let sale = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 0);
        assert_eq!(sale.confirmed_units, 200_000_000);

        // conflicting evidence on a confirmed reservation is an error + anomaly
        let err = h
            .engine
            .confirm(
                &reservation.id,
                Evidence::Crypto {
                    chain_id: 1,
                    tx_hash: "0xother".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyTerminal { .. }));
        let anomalies = h
            .db
            .anomalies()
            .list_for_reservation(&reservation.id)
            .await
            .unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::ConflictingEvidence);
    }

    #[tokio::test]
    async fn test_confirm_validates_evidence_shape() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let sale = sale(now, 1_000);
        h.db.sales().insert(&sale).await.unwrap();

        let reservation = h
            .engine
            .create_reservation(request(&sale.id, 10_000, PaymentRail::Crypto))
            .await
            .unwrap();

        // fiat evidence on a crypto reservation
        let err = h
            .engine
            .confirm(
                &reservation.id,
                Evidence::Fiat {
                    confirmation_id: "pi_1".to_string(),
                    receipt_ref: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidEvidence { .. }));

        // still pending, capacity untouched
        let sale = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 100_000_000);
    }

    #[tokio::test]
    async fn test_late_confirmation_expires_and_surfaces() {
        let config = EngineConfig {
            crypto_ttl_secs: 1,
            ..EngineConfig::default()
        };
        let h = harness(config).await;
        let now = Utc::now();
        let sale = sale(now, 1_000);
        h.db.sales().insert(&sale).await.unwrap();

        let reservation = h
            .engine
            .create_reservation(request(&sale.id, 10_000, PaymentRail::Crypto))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

        // evidence arrives past expiry: the expiry transition wins
        let err = h
            .engine
            .confirm(&reservation.id, crypto_evidence())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ReservationExpired { .. }));

        let stored = h
            .db
            .reservations()
            .get_by_id(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Expired);

        // capacity returned, anomaly recorded
        let sale = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 0);
        let anomalies = h
            .db
            .anomalies()
            .list_for_reservation(&reservation.id)
            .await
            .unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::LateConfirmation);

        // a second late confirmation records another anomaly, same error
        let err = h
            .engine
            .confirm(&reservation.id, crypto_evidence())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ReservationExpired { .. }));
    }

    #[tokio::test]
    async fn test_no_resurrection_from_terminal() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let sale = sale(now, 1_000);
        h.db.sales().insert(&sale).await.unwrap();

        let reservation = h
            .engine
            .create_reservation(request(&sale.id, 10_000, PaymentRail::Fiat))
            .await
            .unwrap();
        h.engine.cancel(&reservation.id).await.unwrap();

        let err = h
            .engine
            .confirm(
                &reservation.id,
                Evidence::Fiat {
                    confirmation_id: "pi_1".to_string(),
                    receipt_ref: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyTerminal { .. }));

        let err = h.engine.reject(&reservation.id, "nope").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyTerminal { .. }));

        // expire is a silent no-op on terminal reservations
        assert!(!h.engine.expire(&reservation.id).await.unwrap());

        let stored = h
            .db
            .reservations()
            .get_by_id(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_reject_and_cancel_idempotence() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let sale = sale(now, 1_000);
        h.db.sales().insert(&sale).await.unwrap();

        let reservation = h
            .engine
            .create_reservation(request(&sale.id, 10_000, PaymentRail::Fiat))
            .await
            .unwrap();

        let rejected = h
            .engine
            .reject(&reservation.id, "card declined")
            .await
            .unwrap();
        assert_eq!(rejected.status, ReservationStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("card declined"));

        // identical repeat is a no-op success
        h.engine
            .reject(&reservation.id, "card declined")
            .await
            .unwrap();
        // different reason is a conflict
        let err = h.engine.reject(&reservation.id, "fraud").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyTerminal { .. }));

        // capacity returned exactly once
        let sale = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 0);
    }

    #[tokio::test]
    async fn test_concurrent_confirm_and_expire_resolve_once() {
        let config = EngineConfig {
            crypto_ttl_secs: 1,
            ..EngineConfig::default()
        };
        let h = harness(config).await;
        let now = Utc::now();
        let sale = sale(now, 1_000);
        h.db.sales().insert(&sale).await.unwrap();

        let reservation = h
            .engine
            .create_reservation(request(&sale.id, 10_000, PaymentRail::Crypto))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

        // Both racers target the same due reservation.
        let confirm = h.engine.confirm(&reservation.id, crypto_evidence());
        let expire = h.engine.expire(&reservation.id);
        let (confirm_result, expire_result) = tokio::join!(confirm, expire);

        // Past expiry the confirmation can never win; exactly one terminal
        // state results and capacity is returned exactly once.
        assert!(matches!(
            confirm_result,
            Err(EngineError::ReservationExpired { .. })
        ));
        expire_result.unwrap();

        let stored = h
            .db
            .reservations()
            .get_by_id(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Expired);

        let sale = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 0);
        assert_eq!(sale.confirmed_units, 0);
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        // Full walkthrough: 1000-token sale, A reserves 200 via crypto,
        // provider confirms, then B's 900 request fails CapacityExceeded.
        init_tracing();
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let sale = sale(now, 1_000);
        h.db.sales().insert(&sale).await.unwrap();

        let a = h
            .engine
            .create_reservation(request(&sale.id, 20_000, PaymentRail::Crypto))
            .await
            .unwrap();
        assert_eq!(a.status, ReservationStatus::Pending);
        let s = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(s.reserved_units, 200_000_000);

        let confirmed = h.engine.confirm(&a.id, crypto_evidence()).await.unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);
        let s = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(s.reserved_units, 0);
        assert_eq!(s.confirmed_units, 200_000_000);

        // distribution intent emitted exactly once
        let dist = h
            .db
            .distributions()
            .get_for_reservation(&a.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dist.quantity_units, 200_000_000);
        assert_eq!(dist.destination, "0xbuyer");

        let mut b = request(&sale.id, 90_000, PaymentRail::Fiat);
        b.buyer_id = "buyer-b".to_string();
        let err = h.engine.create_reservation(b).await.unwrap_err();
        match err {
            EngineError::CapacityExceeded {
                requested_units,
                available_units,
            } => {
                assert_eq!(requested_units, 900_000_000);
                assert_eq!(available_units, 800_000_000);
            }
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }

        // invariant holds at every observed commit point
        let s = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert!(s.reserved_units + s.confirmed_units <= s.total_capacity_units);
        assert!(s.reserved_units >= 0 && s.confirmed_units >= 0);
    }

    #[tokio::test]
    async fn test_validation_rejects_malformed_requests() {
        let h = harness(EngineConfig::default()).await;

        let bad_sale = request("not-a-uuid", 100, PaymentRail::Fiat);
        assert!(matches!(
            h.engine.create_reservation(bad_sale).await.unwrap_err(),
            EngineError::Validation(_)
        ));

        let sale_id = Uuid::new_v4().to_string();
        let zero_amount = request(&sale_id, 0, PaymentRail::Fiat);
        assert!(matches!(
            h.engine.create_reservation(zero_amount).await.unwrap_err(),
            EngineError::Validation(_)
        ));
    }
}
