//! # Sale Repository
//!
//! Database operations for sales.
//!
//! Sale *setup* is an external concern (operators create sales before the
//! window opens); this repository provides the insert for that path plus
//! the reads the engine and sweeper need. Capacity counters are NEVER
//! touched here - only the reservation repository's guarded transition
//! primitives mutate `reserved_units` / `confirmed_units`.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use vesta_core::{KycTier, PaymentRail, Sale};

// =============================================================================
// Row Mapping
// =============================================================================

/// Raw sales row. Accepted rails are stored as a JSON array.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SaleRow {
    pub id: String,
    pub token_symbol: String,
    pub token_decimals: i64,
    pub total_capacity_units: i64,
    pub reserved_units: i64,
    pub confirmed_units: i64,
    pub unit_price_minor: i64,
    pub price_currency: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub kyc_requirement: KycTier,
    pub accepted_rails: String,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SaleRow> for Sale {
    type Error = DbError;

    fn try_from(row: SaleRow) -> Result<Self, Self::Error> {
        let accepted_rails: Vec<PaymentRail> = serde_json::from_str(&row.accepted_rails)
            .map_err(|e| DbError::corrupt("Sale", &row.id, format!("accepted_rails: {}", e)))?;

        let token_decimals = u8::try_from(row.token_decimals)
            .map_err(|_| DbError::corrupt("Sale", &row.id, "token_decimals out of range"))?;

        Ok(Sale {
            id: row.id,
            token_symbol: row.token_symbol,
            token_decimals,
            total_capacity_units: row.total_capacity_units,
            reserved_units: row.reserved_units,
            confirmed_units: row.confirmed_units,
            unit_price_minor: row.unit_price_minor,
            price_currency: row.price_currency,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            kyc_requirement: row.kyc_requirement,
            accepted_rails,
            closed_at: row.closed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SALE_COLUMNS: &str = r#"
    id, token_symbol, token_decimals,
    total_capacity_units, reserved_units, confirmed_units,
    unit_price_minor, price_currency,
    starts_at, ends_at, kyc_requirement, accepted_rails,
    closed_at, created_at, updated_at
"#;

// =============================================================================
// Repository
// =============================================================================

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Inserts a sale (sale-setup path and tests).
    pub async fn insert(&self, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, token = %sale.token_symbol, "Inserting sale");

        let accepted_rails = serde_json::to_string(&sale.accepted_rails)
            .map_err(|e| DbError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, token_symbol, token_decimals,
                total_capacity_units, reserved_units, confirmed_units,
                unit_price_minor, price_currency,
                starts_at, ends_at, kyc_requirement, accepted_rails,
                closed_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.token_symbol)
        .bind(sale.token_decimals as i64)
        .bind(sale.total_capacity_units)
        .bind(sale.reserved_units)
        .bind(sale.confirmed_units)
        .bind(sale.unit_price_minor)
        .bind(&sale.price_currency)
        .bind(sale.starts_at)
        .bind(sale.ends_at)
        .bind(sale.kyc_requirement)
        .bind(&accepted_rails)
        .bind(sale.closed_at)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let row: Option<SaleRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sales WHERE id = ?1",
            SALE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Sale::try_from).transpose()
    }

    /// Lists sales that are open to new reservations at `now`.
    pub async fn list_open(&self, now: DateTime<Utc>) -> DbResult<Vec<Sale>> {
        let rows: Vec<SaleRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM sales
            WHERE closed_at IS NULL AND starts_at <= ?1 AND ends_at > ?1
            ORDER BY starts_at
            "#,
            SALE_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Sale::try_from).collect()
    }

    /// Lists sales whose window has passed but which are not closed yet.
    ///
    /// This is the sweeper's scan.
    pub async fn list_past_end_open(&self, now: DateTime<Utc>) -> DbResult<Vec<Sale>> {
        let rows: Vec<SaleRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM sales
            WHERE closed_at IS NULL AND ends_at <= ?1
            ORDER BY ends_at
            "#,
            SALE_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Sale::try_from).collect()
    }

    /// Closes a sale to new reservations.
    ///
    /// Guarded: only an open sale is closed, so concurrent sweeps cannot
    /// close the same sale twice. Returns whether this call closed it.
    pub async fn close(&self, id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sales SET
                closed_at = ?2,
                updated_at = ?2
            WHERE id = ?1 AND closed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
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

    fn sample_sale(now: DateTime<Utc>) -> Sale {
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

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let sale = sample_sale(now);

        db.sales().insert(&sale).await.unwrap();
        let loaded = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();

        assert_eq!(loaded.token_symbol, "VST");
        assert_eq!(loaded.token_decimals, 6);
        assert_eq!(loaded.total_capacity_units, 1_000_000_000);
        assert_eq!(loaded.accepted_rails.len(), 2);
        assert_eq!(loaded.kyc_requirement, KycTier::None);
    }

    #[tokio::test]
    async fn test_get_missing_sale() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let loaded = db.sales().get_by_id("nope").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_close_is_guarded() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let mut sale = sample_sale(now);
        sale.ends_at = now - Duration::minutes(1);
        db.sales().insert(&sale).await.unwrap();

        let due = db.sales().list_past_end_open(now).await.unwrap();
        assert_eq!(due.len(), 1);

        // first close wins, second is a no-op
        assert!(db.sales().close(&sale.id, now).await.unwrap());
        assert!(!db.sales().close(&sale.id, now).await.unwrap());

        let due = db.sales().list_past_end_open(now).await.unwrap();
        assert!(due.is_empty());
    }
}
