//! # vesta-db: Ledger Store for Vesta
//!
//! Durable, transactional storage for sales, reservations, distributions,
//! and reconciliation anomalies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        vesta-db                                         │
//! │                                                                         │
//! │  vesta-engine (AllocationEngine / Gateway / Sweeper)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database ──► SaleRepository          (reads, close)                   │
//! │           ──► ReservationRepository   (ATOMIC TRANSITIONS + reads)     │
//! │           ──► DistributionRepository  (reads)                          │
//! │           ──► AnomalyRepository       (insert + reads)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL) + embedded migrations                                    │
//! │                                                                         │
//! │  THE STORE IS THE SERIALIZATION POINT: every capacity change is a      │
//! │  guarded UPDATE inside one transaction. No in-process lock is part     │
//! │  of the correctness story, so multiple service instances are safe.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::{
    AnomalyRepository, DistributionRepository, ReservationRepository, SaleRepository,
};
