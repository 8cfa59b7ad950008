//! # Distribution Repository
//!
//! Reads for distribution intents. Rows are created exclusively by the
//! reservation repository's confirm transaction (outbox pattern) and are
//! never mutated; the external delivery subsystem consumes them.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::DbResult;
use vesta_core::Distribution;

/// Raw distributions row.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DistributionRow {
    pub id: String,
    pub reservation_id: String,
    pub destination: String,
    pub quantity_units: i64,
    pub created_at: DateTime<Utc>,
}

impl From<DistributionRow> for Distribution {
    fn from(row: DistributionRow) -> Self {
        Distribution {
            id: row.id,
            reservation_id: row.reservation_id,
            destination: row.destination,
            quantity_units: row.quantity_units,
            created_at: row.created_at,
        }
    }
}

/// Repository for distribution reads.
#[derive(Debug, Clone)]
pub struct DistributionRepository {
    pool: SqlitePool,
}

impl DistributionRepository {
    /// Creates a new DistributionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DistributionRepository { pool }
    }

    /// Gets the distribution intent for a reservation, if confirmed.
    pub async fn get_for_reservation(
        &self,
        reservation_id: &str,
    ) -> DbResult<Option<Distribution>> {
        let row: Option<DistributionRow> = sqlx::query_as(
            r#"
            SELECT id, reservation_id, destination, quantity_units, created_at
            FROM distributions
            WHERE reservation_id = ?1
            "#,
        )
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Distribution::from))
    }

    /// Lists recent distribution intents, newest first.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<Distribution>> {
        let rows: Vec<DistributionRow> = sqlx::query_as(
            r#"
            SELECT id, reservation_id, destination, quantity_units, created_at
            FROM distributions
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Distribution::from).collect())
    }
}
