//! # Sweeper
//!
//! The periodic pass that closes sales whose window has ended and expires
//! timed-out PENDING reservations, returning their capacity.
//!
//! ## Sweep Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sweeper                                         │
//! │                                                                         │
//! │  tokio interval ──┐                                                     │
//! │                   ├──► sweep_once()                                     │
//! │  cron trigger ────┘      │                                              │
//! │  (authenticated)         ├── 1. close sales past their window           │
//! │                          │      (guarded UPDATE, one winner)            │
//! │                          │                                              │
//! │                          └── 2. expire due PENDING reservations         │
//! │                                 via engine.expire (idempotent)          │
//! │                                                                         │
//! │  SAFE TO OVERLAP: every step is an idempotent guarded transition, so    │
//! │  concurrent sweeps (overlapping schedules, multiple instances) cannot   │
//! │  double-return capacity. No coordination between sweepers exists or    │
//! │  is needed - races resolve inside the store.                           │
//! │                                                                         │
//! │  The sale scan and the reservation scan run independently: closing a   │
//! │  sale only blocks NEW reservations; in-flight PENDING rows still       │
//! │  confirm or expire on their own timer.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use vesta_db::Database;

use crate::auth::{CredentialScope, CredentialVerifier};
use crate::config::EngineConfig;
use crate::engine::AllocationEngine;
use crate::error::{EngineError, EngineResult};
use crate::oracle::RateSource;

// =============================================================================
// Sweep Report
// =============================================================================

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sales closed to new reservations.
    pub sales_closed: u64,
    /// Reservations expired and returned to capacity.
    pub reservations_expired: u64,
}

// =============================================================================
// Sweeper
// =============================================================================

/// The sweeper. Cheap to clone; every clone sweeps the same ledger.
pub struct Sweeper<S> {
    engine: Arc<AllocationEngine<S>>,
    db: Database,
    verifier: Arc<CredentialVerifier>,
    config: Arc<EngineConfig>,
}

// Not derived: a derive would demand S: Clone, but only the Arc is cloned.
impl<S> Clone for Sweeper<S> {
    fn clone(&self) -> Self {
        Sweeper {
            engine: self.engine.clone(),
            db: self.db.clone(),
            verifier: self.verifier.clone(),
            config: self.config.clone(),
        }
    }
}

/// Handle for stopping a spawned sweeper loop.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SweeperHandle {
    /// Triggers graceful shutdown of the sweep loop.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl<S: RateSource + 'static> Sweeper<S> {
    /// Creates a new sweeper.
    pub fn new(
        engine: Arc<AllocationEngine<S>>,
        db: Database,
        verifier: Arc<CredentialVerifier>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Sweeper {
            engine,
            db,
            verifier,
            config,
        }
    }

    /// Runs one idempotent sweep pass.
    ///
    /// Cheap no-op when nothing is due. Per-item failures are logged and
    /// skipped - a bad row must never wedge the sweep.
    pub async fn sweep_once(&self) -> EngineResult<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        // 1. Close sales whose window has passed.
        for sale in self.db.sales().list_past_end_open(now).await? {
            match self.db.sales().close(&sale.id, now).await {
                Ok(true) => {
                    info!(sale_id = %sale.id, "Sale window ended; closed to new reservations");
                    report.sales_closed += 1;
                }
                Ok(false) => {} // a concurrent sweep won
                Err(e) => {
                    error!(sale_id = %sale.id, error = %e, "Failed to close sale");
                }
            }
        }

        // 2. Expire due PENDING reservations.
        let due = self
            .db
            .reservations()
            .list_expired_pending(now, self.config.sweep_batch_size)
            .await?;

        if due.is_empty() && report.sales_closed == 0 {
            debug!("Sweep pass: nothing due");
            return Ok(report);
        }

        for reservation in due {
            match self.engine.expire(&reservation.id).await {
                Ok(true) => report.reservations_expired += 1,
                Ok(false) => {} // resolved concurrently; nothing to do
                Err(e) => {
                    error!(
                        reservation_id = %reservation.id,
                        error = %e,
                        "Failed to expire reservation"
                    );
                }
            }
        }

        info!(
            sales_closed = report.sales_closed,
            reservations_expired = report.reservations_expired,
            "Sweep pass complete"
        );

        Ok(report)
    }

    /// The cron-trigger entry point: authenticates the sweep-scoped
    /// credential, then runs one pass.
    ///
    /// Safe to invoke more often than the sweep interval.
    pub async fn handle_trigger(&self, bearer: Option<&str>) -> EngineResult<SweepReport> {
        let token = bearer.ok_or_else(|| {
            EngineError::Unauthorized("missing authorization credential".to_string())
        })?;
        self.verifier.verify(CredentialScope::Sweep, token)?;

        self.sweep_once().await
    }

    /// Spawns the interval loop and returns a shutdown handle.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(self.run_loop(shutdown_rx));
        SweeperHandle { shutdown_tx }
    }

    /// Runs the sweep loop until shutdown.
    async fn run_loop(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            interval_secs = self.config.sweep_interval_secs,
            "Sweeper starting"
        );

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.config.sweep_interval_secs,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Sweep pass failed");
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Sweeper shutting down");
                    break;
                }
            }
        }

        info!("Sweeper stopped");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;
    use vesta_core::{
        KycStatus, KycTier, PaymentRail, RateData, Reservation, ReservationStatus, Sale,
    };
    use vesta_db::DbConfig;

    use crate::engine::ReservationRequest;
    use crate::oracle::{FixedRateSource, OracleConfig, PriceOracle};

    struct Harness {
        sweeper: Sweeper<Arc<FixedRateSource>>,
        engine: Arc<AllocationEngine<Arc<FixedRateSource>>>,
        verifier: Arc<CredentialVerifier>,
        db: Database,
    }

    async fn harness(config: EngineConfig) -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let source = Arc::new(FixedRateSource::new());
        source
            .set_rate(
                "USD",
                "VST",
                RateData {
                    rate_scaled: 100_000_000,
                    fetched_at: Utc::now(),
                },
            )
            .await;

        let config = Arc::new(config);
        let engine = Arc::new(AllocationEngine::new(
            db.clone(),
            PriceOracle::new(source, OracleConfig::default()),
            config.clone(),
        ));
        let verifier = Arc::new(CredentialVerifier::new(
            "reconcile-secret".to_string(),
            "sweep-secret".to_string(),
        ));
        let sweeper = Sweeper::new(engine.clone(), db.clone(), verifier.clone(), config);

        Harness {
            sweeper,
            engine,
            verifier,
            db,
        }
    }

    fn sale_at(now: DateTime<Utc>) -> Sale {
        Sale {
            id: Uuid::new_v4().to_string(),
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
            created_at: now,
            updated_at: now,
        }
    }

    async fn reserve(h: &Harness, sale: &Sale) -> Reservation {
        h.engine
            .create_reservation(ReservationRequest {
                sale_id: sale.id.clone(),
                buyer_id: "buyer-a".to_string(),
                rail: PaymentRail::Crypto,
                source_asset: "USD".to_string(),
                source_amount_minor: 10_000,
                source_decimals: 2,
                kyc: KycStatus::unverified(),
                destination: None,
                metadata: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_expires_due_reservations_exactly_once() {
        let h = harness(EngineConfig {
            crypto_ttl_secs: 1,
            ..EngineConfig::default()
        })
        .await;
        let now = Utc::now();
        let sale = sale_at(now);
        h.db.sales().insert(&sale).await.unwrap();

        let reservation = reserve(&h, &sale).await;
        let s = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(s.reserved_units, 100_000_000);

        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

        // run the sweep twice in the same due window
        let first = h.sweeper.sweep_once().await.unwrap();
        let second = h.sweeper.sweep_once().await.unwrap();

        assert_eq!(first.reservations_expired, 1);
        assert_eq!(second.reservations_expired, 0);

        let stored = h
            .db
            .reservations()
            .get_by_id(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Expired);

        // quantity returned exactly once
        let s = h.db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(s.reserved_units, 0);
    }

    #[tokio::test]
    async fn test_sweep_leaves_fresh_reservations_alone() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let sale = sale_at(now);
        h.db.sales().insert(&sale).await.unwrap();

        let reservation = reserve(&h, &sale).await;

        let report = h.sweeper.sweep_once().await.unwrap();
        assert_eq!(report, SweepReport::default());

        let stored = h
            .db
            .reservations()
            .get_by_id(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweep_closes_past_end_sales_but_pending_rows_survive() {
        let h = harness(EngineConfig::default()).await;
        let now = Utc::now();
        let sale = sale_at(now);
        h.db.sales().insert(&sale).await.unwrap();

        // reserve while open, then simulate the window passing
        let reservation = reserve(&h, &sale).await;
        sqlx::query("UPDATE sales SET ends_at = ?1 WHERE id = ?2")
            .bind(now - Duration::minutes(1))
            .bind(&sale.id)
            .execute(h.db.pool())
            .await
            .unwrap();

        let report = h.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.sales_closed, 1);

        // closed sale refuses new reservations...
        let err = h
            .engine
            .create_reservation(ReservationRequest {
                sale_id: sale.id.clone(),
                buyer_id: "buyer-b".to_string(),
                rail: PaymentRail::Fiat,
                source_asset: "USD".to_string(),
                source_amount_minor: 100,
                source_decimals: 2,
                kyc: KycStatus::unverified(),
                destination: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SaleNotOpen { .. }));

        // ...but the in-flight PENDING reservation still resolves normally
        let confirmed = h
            .engine
            .confirm(
                &reservation.id,
                vesta_core::Evidence::Crypto {
                    chain_id: 1,
                    tx_hash: "0xabc".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_trigger_requires_sweep_credential() {
        let h = harness(EngineConfig::default()).await;

        // no credential
        let err = h.sweeper.handle_trigger(None).await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));

        // reconcile-scoped credential is not a sweep credential
        let reconcile = h
            .verifier
            .issue(CredentialScope::Reconcile, "scheduler", 3600)
            .unwrap();
        let err = h
            .sweeper
            .handle_trigger(Some(&reconcile))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));

        // the real thing works and is a cheap no-op with nothing due
        let token = h
            .verifier
            .issue(CredentialScope::Sweep, "scheduler", 3600)
            .unwrap();
        let report = h.sweeper.handle_trigger(Some(&token)).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_spawned_loop_shuts_down() {
        let h = harness(EngineConfig {
            sweep_interval_secs: 3600,
            ..EngineConfig::default()
        })
        .await;

        let handle = h.sweeper.clone().spawn();
        handle.shutdown().await;
        // nothing to assert beyond "does not hang": shutdown resolves
    }
}
