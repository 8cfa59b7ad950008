//! # vesta-engine: Allocation Engine for Vesta
//!
//! The service layer of the token-sale core: the reservation state machine,
//! price oracle adapter, reconciliation gateway, chain receipt poller, and
//! expiry sweeper.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  buyer request ──► gating ──► AllocationEngine.create_reservation       │
//! │                               (atomic reserve, frozen quote, PENDING)   │
//! │                                                                         │
//! │  provider webhook ──► ReconciliationGateway.ingest                      │
//! │                       (authenticate, normalize, idempotent apply)       │
//! │                                                                         │
//! │  chain watcher ──► ReceiptPoller ──► AllocationEngine.confirm           │
//! │                                                                         │
//! │  cron / interval ──► Sweeper ──► AllocationEngine.expire                │
//! │                                                                         │
//! │  Every transition funnels through the engine; every engine transition   │
//! │  is one guarded transaction in vesta-db. The capacity invariant         │
//! │  (reserved + confirmed <= total) holds at every commit point.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`] - the reservation state machine
//! - [`oracle`] - rate sourcing, staleness, fee loading
//! - [`gateway`] - authenticated webhook ingest
//! - [`chain`] - per-reservation receipt polling
//! - [`sweeper`] - periodic expiry / sale-close pass
//! - [`auth`] - shared-secret trigger credentials
//! - [`config`] - environment-driven configuration
//! - [`context`] - build-once, pass-down service lifecycle
//! - [`error`] - the engine's failure taxonomy

pub mod auth;
pub mod chain;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod oracle;
pub mod sweeper;

pub use auth::{extract_bearer_token, CredentialScope, CredentialVerifier};
pub use chain::{ChainClient, PollerConfig, ReceiptPoller, ReceiptPollerHandle, TxReceipt};
pub use config::{ConfigError, EngineConfig};
pub use context::ServiceContext;
pub use engine::{AllocationEngine, ReservationRequest};
pub use error::{EngineError, EngineResult};
pub use gateway::{IngestOutcome, ProviderEvent, ProviderStatus, ReconciliationGateway};
pub use oracle::{FixedRateSource, OracleConfig, PriceOracle, RateSource};
pub use sweeper::{SweepReport, Sweeper, SweeperHandle};
