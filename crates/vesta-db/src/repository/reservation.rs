//! # Reservation Repository
//!
//! Database operations for reservations, including the atomic transition
//! primitives that are the ONLY writers of sale capacity counters.
//!
//! ## Reservation Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Reservation Lifecycle                                │
//! │                                                                         │
//! │  1. RESERVE (create_pending)                                           │
//! │     └── one tx: guarded capacity increment + insert PENDING row        │
//! │                                                                         │
//! │  2a. CONFIRM (commit_confirm)                                          │
//! │      └── one tx: status pending→confirmed (guarded)                    │
//! │                  reserved -= qty, confirmed += qty                     │
//! │                  insert distribution intent                            │
//! │                                                                         │
//! │  2b. RELEASE (commit_release → rejected / cancelled / expired)         │
//! │      └── one tx: status pending→terminal (guarded)                     │
//! │                  reserved -= qty                                       │
//! │                                                                         │
//! │  RACES: the `WHERE status = 'pending'` guard means exactly ONE         │
//! │  transition ever fires per reservation; the loser sees                 │
//! │  rows_affected == 0 and re-reads. Capacity is adjusted exactly once    │
//! │  because the counter update rides the winning transaction.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use vesta_core::{
    Distribution, Evidence, PaymentRail, RateQuote, Reservation, ReservationStatus,
};

// =============================================================================
// Row Mapping
// =============================================================================

/// Raw reservations row. Quote, evidence, and metadata are JSON columns.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ReservationRow {
    pub id: String,
    pub sale_id: String,
    pub buyer_id: String,
    pub rail: PaymentRail,
    pub quantity_units: i64,
    pub quote_json: String,
    pub status: ReservationStatus,
    pub evidence_json: Option<String>,
    pub rejection_reason: Option<String>,
    pub destination: Option<String>,
    pub metadata_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = DbError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let quote: RateQuote = serde_json::from_str(&row.quote_json)
            .map_err(|e| DbError::corrupt("Reservation", &row.id, format!("quote: {}", e)))?;

        let evidence: Option<Evidence> = row
            .evidence_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| DbError::corrupt("Reservation", &row.id, format!("evidence: {}", e)))?;

        let metadata: Option<serde_json::Value> = row
            .metadata_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| DbError::corrupt("Reservation", &row.id, format!("metadata: {}", e)))?;

        Ok(Reservation {
            id: row.id,
            sale_id: row.sale_id,
            buyer_id: row.buyer_id,
            rail: row.rail,
            quantity_units: row.quantity_units,
            quote,
            status: row.status,
            evidence,
            rejection_reason: row.rejection_reason,
            destination: row.destination,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
            resolved_at: row.resolved_at,
        })
    }
}

const RESERVATION_COLUMNS: &str = r#"
    id, sale_id, buyer_id, rail, quantity_units, quote_json,
    status, evidence_json, rejection_reason, destination, metadata_json,
    created_at, updated_at, expires_at, resolved_at
"#;

// =============================================================================
// Repository
// =============================================================================

/// Repository for reservation database operations.
#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

impl ReservationRepository {
    /// Creates a new ReservationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    // =========================================================================
    // Transition Primitives
    // =========================================================================

    /// Atomically reserves capacity and inserts a PENDING reservation.
    ///
    /// One transaction:
    /// 1. guarded UPDATE on the sale's `reserved_units` - the guard
    ///    `reserved + confirmed + qty <= total` is the oversell check, and
    ///    it is evaluated inside the store, so concurrent creators cannot
    ///    both pass it
    /// 2. INSERT of the reservation row
    ///
    /// Returns `false` when the capacity guard failed (nothing written).
    pub async fn create_pending(&self, reservation: &Reservation) -> DbResult<bool> {
        debug!(
            id = %reservation.id,
            sale_id = %reservation.sale_id,
            quantity = reservation.quantity_units,
            "Reserving capacity"
        );

        let quote_json = serde_json::to_string(&reservation.quote)
            .map_err(|e| DbError::Internal(e.to_string()))?;
        let metadata_json = reservation
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DbError::Internal(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let reserved = sqlx::query(
            r#"
            UPDATE sales SET
                reserved_units = reserved_units + ?1,
                updated_at = ?2
            WHERE id = ?3
              AND reserved_units + confirmed_units + ?1 <= total_capacity_units
            "#,
        )
        .bind(reservation.quantity_units)
        .bind(reservation.created_at)
        .bind(&reservation.sale_id)
        .execute(&mut *tx)
        .await?;

        if reserved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, sale_id, buyer_id, rail, quantity_units, quote_json,
                status, evidence_json, rejection_reason, destination, metadata_json,
                created_at, updated_at, expires_at, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&reservation.id)
        .bind(&reservation.sale_id)
        .bind(&reservation.buyer_id)
        .bind(reservation.rail)
        .bind(reservation.quantity_units)
        .bind(&quote_json)
        .bind(reservation.status)
        .bind(Option::<String>::None)
        .bind(&reservation.rejection_reason)
        .bind(&reservation.destination)
        .bind(&metadata_json)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .bind(reservation.expires_at)
        .bind(reservation.resolved_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Atomically confirms a PENDING reservation.
    ///
    /// One transaction:
    /// 1. guarded UPDATE pending → confirmed, recording evidence
    /// 2. `reserved -= qty`, `confirmed += qty` on the sale
    /// 3. INSERT of the distribution intent (outbox row for the external
    ///    delivery subsystem)
    ///
    /// Returns `false` when the reservation was no longer PENDING (the
    /// caller lost a race and must re-read to find out who won).
    pub async fn commit_confirm(
        &self,
        reservation: &Reservation,
        evidence: &Evidence,
        distribution: &Distribution,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        debug!(id = %reservation.id, "Confirming reservation");

        let evidence_json =
            serde_json::to_string(evidence).map_err(|e| DbError::Internal(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            r#"
            UPDATE reservations SET
                status = 'confirmed',
                evidence_json = ?2,
                updated_at = ?3,
                resolved_at = ?3
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(&reservation.id)
        .bind(&evidence_json)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE sales SET
                reserved_units = reserved_units - ?1,
                confirmed_units = confirmed_units + ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(reservation.quantity_units)
        .bind(now)
        .bind(&reservation.sale_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO distributions (
                id, reservation_id, destination, quantity_units, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&distribution.id)
        .bind(&distribution.reservation_id)
        .bind(&distribution.destination)
        .bind(distribution.quantity_units)
        .bind(distribution.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Atomically releases a PENDING reservation to a capacity-returning
    /// terminal status (rejected / cancelled / expired).
    ///
    /// Returns `false` when the reservation was no longer PENDING.
    pub async fn commit_release(
        &self,
        reservation: &Reservation,
        to_status: ReservationStatus,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        match to_status {
            ReservationStatus::Rejected
            | ReservationStatus::Cancelled
            | ReservationStatus::Expired => {}
            other => {
                return Err(DbError::Internal(format!(
                    "commit_release cannot target status '{}'",
                    other
                )));
            }
        }

        debug!(id = %reservation.id, to = %to_status, "Releasing reservation");

        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            r#"
            UPDATE reservations SET
                status = ?2,
                rejection_reason = COALESCE(?3, rejection_reason),
                updated_at = ?4,
                resolved_at = ?4
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(&reservation.id)
        .bind(to_status)
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE sales SET
                reserved_units = reserved_units - ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(reservation.quantity_units)
        .bind(now)
        .bind(&reservation.sale_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a reservation by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Reservation>> {
        let row: Option<ReservationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM reservations WHERE id = ?1",
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Reservation::try_from).transpose()
    }

    /// Lists PENDING reservations whose expiry has passed - the sweeper's
    /// work queue.
    pub async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Reservation>> {
        let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM reservations
            WHERE status = 'pending' AND expires_at < ?1
            ORDER BY expires_at
            LIMIT ?2
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Reservation::try_from).collect()
    }

    /// Lists all reservations for a sale.
    pub async fn list_for_sale(&self, sale_id: &str) -> DbResult<Vec<Reservation>> {
        let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM reservations
            WHERE sale_id = ?1
            ORDER BY created_at
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Reservation::try_from).collect()
    }

    /// Lists all reservations for a buyer.
    pub async fn list_for_buyer(&self, buyer_id: &str) -> DbResult<Vec<Reservation>> {
        let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM reservations
            WHERE buyer_id = ?1
            ORDER BY created_at
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(buyer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Reservation::try_from).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use uuid::Uuid;
    use vesta_core::{KycTier, RateQuote, Sale};

    fn sample_sale(now: DateTime<Utc>, capacity: i64) -> Sale {
        Sale {
            id: Uuid::new_v4().to_string(),
            token_symbol: "VST".to_string(),
            token_decimals: 6,
            total_capacity_units: capacity,
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

    fn sample_reservation(sale: &Sale, quantity_units: i64, now: DateTime<Utc>) -> Reservation {
        Reservation {
            id: Uuid::new_v4().to_string(),
            sale_id: sale.id.clone(),
            buyer_id: "buyer-1".to_string(),
            rail: PaymentRail::Crypto,
            quantity_units,
            quote: RateQuote {
                source_asset: "USD".to_string(),
                target_asset: "VST".to_string(),
                rate_scaled: 100_000_000,
                rate_decimals: 8,
                fee_bps: 0,
                fee_adjusted: false,
                source_amount_minor: quantity_units / 10_000,
                token_units: quantity_units,
                computed_at: now,
            },
            status: ReservationStatus::Pending,
            evidence: None,
            rejection_reason: None,
            destination: Some("0xdest".to_string()),
            metadata: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::minutes(30),
            resolved_at: None,
        }
    }

    fn sample_distribution(reservation: &Reservation, now: DateTime<Utc>) -> Distribution {
        Distribution {
            id: Uuid::new_v4().to_string(),
            reservation_id: reservation.id.clone(),
            destination: "0xdest".to_string(),
            quantity_units: reservation.quantity_units,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_pending_reserves_capacity() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let sale = sample_sale(now, 1_000);
        db.sales().insert(&sale).await.unwrap();

        let reservation = sample_reservation(&sale, 400, now);
        assert!(db.reservations().create_pending(&reservation).await.unwrap());

        let sale = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 400);
        assert_eq!(sale.confirmed_units, 0);

        let loaded = db
            .reservations()
            .get_by_id(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, ReservationStatus::Pending);
        assert_eq!(loaded.quote.rate_scaled, 100_000_000);
    }

    #[tokio::test]
    async fn test_create_pending_guards_capacity() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let sale = sample_sale(now, 1_000);
        db.sales().insert(&sale).await.unwrap();

        let first = sample_reservation(&sale, 900, now);
        assert!(db.reservations().create_pending(&first).await.unwrap());

        // 900 reserved + 200 requested > 1000 → guard refuses, nothing written
        let second = sample_reservation(&sale, 200, now);
        assert!(!db.reservations().create_pending(&second).await.unwrap());

        let sale = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 900);
        assert!(db
            .reservations()
            .get_by_id(&second.id)
            .await
            .unwrap()
            .is_none());

        // an exact fill still fits
        let third = sample_reservation(&sale, 100, now);
        assert!(db.reservations().create_pending(&third).await.unwrap());
        let sale = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 1_000);
    }

    #[tokio::test]
    async fn test_commit_confirm_moves_counters_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let sale = sample_sale(now, 1_000);
        db.sales().insert(&sale).await.unwrap();

        let reservation = sample_reservation(&sale, 250, now);
        db.reservations()
            .create_pending(&reservation)
            .await
            .unwrap();

        let evidence = Evidence::Crypto {
            chain_id: 1,
            tx_hash: "0xabc".to_string(),
        };
        let distribution = sample_distribution(&reservation, now);

        assert!(db
            .reservations()
            .commit_confirm(&reservation, &evidence, &distribution, now)
            .await
            .unwrap());

        // second confirm loses the guard - counters untouched
        assert!(!db
            .reservations()
            .commit_confirm(&reservation, &evidence, &distribution, now)
            .await
            .unwrap());

        let sale = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 0);
        assert_eq!(sale.confirmed_units, 250);

        let loaded = db
            .reservations()
            .get_by_id(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, ReservationStatus::Confirmed);
        assert_eq!(loaded.evidence, Some(evidence));
        assert!(loaded.resolved_at.is_some());

        let dist = db
            .distributions()
            .get_for_reservation(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dist.quantity_units, 250);
    }

    #[tokio::test]
    async fn test_commit_release_returns_capacity_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let sale = sample_sale(now, 1_000);
        db.sales().insert(&sale).await.unwrap();

        let reservation = sample_reservation(&sale, 300, now);
        db.reservations()
            .create_pending(&reservation)
            .await
            .unwrap();

        assert!(db
            .reservations()
            .commit_release(&reservation, ReservationStatus::Expired, None, now)
            .await
            .unwrap());

        // double expiry must never double-return capacity
        assert!(!db
            .reservations()
            .commit_release(&reservation, ReservationStatus::Expired, None, now)
            .await
            .unwrap());

        let sale = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(sale.reserved_units, 0);
        assert_eq!(sale.confirmed_units, 0);
    }

    #[tokio::test]
    async fn test_commit_release_rejects_bad_target() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let sale = sample_sale(now, 1_000);
        db.sales().insert(&sale).await.unwrap();
        let reservation = sample_reservation(&sale, 10, now);
        db.reservations()
            .create_pending(&reservation)
            .await
            .unwrap();

        let err = db
            .reservations()
            .commit_release(&reservation, ReservationStatus::Confirmed, None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Internal(_)));
    }

    #[tokio::test]
    async fn test_list_expired_pending() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let sale = sample_sale(now, 10_000);
        db.sales().insert(&sale).await.unwrap();

        let mut due = sample_reservation(&sale, 100, now);
        due.expires_at = now - Duration::minutes(1);
        let fresh = sample_reservation(&sale, 100, now);

        db.reservations().create_pending(&due).await.unwrap();
        db.reservations().create_pending(&fresh).await.unwrap();

        let expired = db
            .reservations()
            .list_expired_pending(now, 100)
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, due.id);
    }
}
