//! # Reconciliation Anomaly Repository
//!
//! Persistence for manual-reconciliation signals. A late confirmation for
//! an expired reservation means money may have moved for a slot that was
//! already released - that must surface to an operator, never be swallowed.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::DbResult;
use vesta_core::{AnomalyKind, ReconciliationAnomaly};

/// Raw reconciliation_anomalies row.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AnomalyRow {
    pub id: String,
    pub reservation_id: String,
    pub kind: AnomalyKind,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl From<AnomalyRow> for ReconciliationAnomaly {
    fn from(row: AnomalyRow) -> Self {
        ReconciliationAnomaly {
            id: row.id,
            reservation_id: row.reservation_id,
            kind: row.kind,
            detail: row.detail,
            created_at: row.created_at,
        }
    }
}

/// Repository for reconciliation anomalies.
#[derive(Debug, Clone)]
pub struct AnomalyRepository {
    pool: SqlitePool,
}

impl AnomalyRepository {
    /// Creates a new AnomalyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AnomalyRepository { pool }
    }

    /// Records an anomaly.
    pub async fn insert(&self, anomaly: &ReconciliationAnomaly) -> DbResult<()> {
        warn!(
            reservation_id = %anomaly.reservation_id,
            kind = ?anomaly.kind,
            detail = %anomaly.detail,
            "Recording reconciliation anomaly"
        );

        sqlx::query(
            r#"
            INSERT INTO reconciliation_anomalies (
                id, reservation_id, kind, detail, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&anomaly.id)
        .bind(&anomaly.reservation_id)
        .bind(anomaly.kind)
        .bind(&anomaly.detail)
        .bind(anomaly.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lists anomalies for a reservation.
    pub async fn list_for_reservation(
        &self,
        reservation_id: &str,
    ) -> DbResult<Vec<ReconciliationAnomaly>> {
        let rows: Vec<AnomalyRow> = sqlx::query_as(
            r#"
            SELECT id, reservation_id, kind, detail, created_at
            FROM reconciliation_anomalies
            WHERE reservation_id = ?1
            ORDER BY created_at
            "#,
        )
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ReconciliationAnomaly::from).collect())
    }

    /// Lists recent anomalies, newest first - the operator's review queue.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<ReconciliationAnomaly>> {
        let rows: Vec<AnomalyRow> = sqlx::query_as(
            r#"
            SELECT id, reservation_id, kind, detail, created_at
            FROM reconciliation_anomalies
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ReconciliationAnomaly::from).collect())
    }
}
