//! # Service Context
//!
//! The explicitly constructed, passed-down lifecycle object: built once at
//! process start, handed to each component, torn down on shutdown. There
//! are no implicit singletons anywhere in the core - the database handle,
//! oracle, engine, gateway, and sweeper all live here.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  process start                                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  EngineConfig::load()                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ServiceContext::build(config, rate_source)                             │
//! │       ├── Database (pool + migrations)                                  │
//! │       ├── PriceOracle over the rate source                              │
//! │       ├── AllocationEngine                                              │
//! │       ├── CredentialVerifier                                            │
//! │       ├── ReconciliationGateway                                         │
//! │       └── Sweeper                                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ctx.start_sweeper()        (spawns the interval loop)                  │
//! │       │                                                                 │
//! │      ... transport adapters borrow ctx.gateway / ctx.sweeper ...        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ctx.shutdown().await       (stops the sweeper, closes the pool)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tracing::info;

use vesta_db::{Database, DbConfig};

use crate::auth::CredentialVerifier;
use crate::config::EngineConfig;
use crate::engine::AllocationEngine;
use crate::error::EngineResult;
use crate::gateway::ReconciliationGateway;
use crate::oracle::{OracleConfig, PriceOracle, RateSource};
use crate::sweeper::{Sweeper, SweeperHandle};

/// Shared service state with explicit lifecycle.
pub struct ServiceContext<S> {
    pub config: Arc<EngineConfig>,
    pub db: Database,
    pub engine: Arc<AllocationEngine<S>>,
    pub verifier: Arc<CredentialVerifier>,
    pub gateway: ReconciliationGateway<S>,
    pub sweeper: Sweeper<S>,
    sweeper_handle: Option<SweeperHandle>,
}

impl<S: RateSource + 'static> ServiceContext<S> {
    /// Builds the full component graph, connecting (and migrating) the
    /// ledger database at `config.database_path`.
    pub async fn build(config: EngineConfig, rate_source: S) -> EngineResult<Self> {
        let db = Database::new(DbConfig::new(&config.database_path)).await?;
        Ok(Self::build_with_database(config, rate_source, db))
    }

    /// Builds the component graph over an existing database handle
    /// (tests use this with an in-memory pool).
    pub fn build_with_database(config: EngineConfig, rate_source: S, db: Database) -> Self {
        let config = Arc::new(config);

        let oracle = PriceOracle::new(
            rate_source,
            OracleConfig {
                fetch_timeout: config.rate_timeout(),
                max_age: chrono::Duration::seconds(config.rate_max_age_secs),
                fee: config.management_fee(),
            },
        );

        let engine = Arc::new(AllocationEngine::new(db.clone(), oracle, config.clone()));

        let verifier = Arc::new(CredentialVerifier::new(
            config.reconcile_secret.clone(),
            config.sweep_secret.clone(),
        ));

        let gateway = ReconciliationGateway::new(engine.clone(), verifier.clone());
        let sweeper = Sweeper::new(engine.clone(), db.clone(), verifier.clone(), config.clone());

        info!("Service context built");

        ServiceContext {
            config,
            db,
            engine,
            verifier,
            gateway,
            sweeper,
            sweeper_handle: None,
        }
    }

    /// Spawns the sweeper's interval loop. No-op if already running.
    pub fn start_sweeper(&mut self) {
        if self.sweeper_handle.is_none() {
            self.sweeper_handle = Some(self.sweeper.clone().spawn());
        }
    }

    /// Graceful teardown: stops the sweeper and closes the pool.
    pub async fn shutdown(mut self) {
        info!("Service context shutting down");

        if let Some(handle) = self.sweeper_handle.take() {
            handle.shutdown().await;
        }

        self.db.close().await;

        info!("Service context shutdown complete");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
