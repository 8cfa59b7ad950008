//! # Reconciliation Gateway
//!
//! Ingests asynchronous evidence of payment - webhook deliveries and polled
//! provider statuses - authenticates it, normalizes it, and feeds it into
//! the allocation engine exactly once per logical event.
//!
//! ## Ingest Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  provider ──► ingest(bearer, body)                                      │
//! │                                                                         │
//! │  1. AUTHENTICATE   bad/missing credential → Err(Unauthorized)           │
//! │                    (fail closed; nothing reaches the engine)            │
//! │                                                                         │
//! │  2. PARSE          malformed body → Ok(Discarded) + warn log            │
//! │                    (acknowledged-but-logged: a payload that will        │
//! │                     never parse must not trigger retry storms)          │
//! │                                                                         │
//! │  3. APPLY          confirmed → engine.confirm                           │
//! │                    failed    → engine.reject                            │
//! │                                                                         │
//! │  Duplicate delivery is absorbed by the engine's idempotent              │
//! │  transitions - the gateway keeps NO dedup state of its own, so there    │
//! │  is a single source of truth for "have we already applied this".       │
//! │                                                                         │
//! │  Transient failures return Err so the provider retries; everything     │
//! │  the provider cannot fix by retrying is acknowledged.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use vesta_core::{Evidence, ReservationStatus};

use crate::auth::{CredentialScope, CredentialVerifier};
use crate::engine::AllocationEngine;
use crate::error::{EngineError, EngineResult};
use crate::oracle::RateSource;

// =============================================================================
// Wire Types
// =============================================================================

/// Terminal status reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// The payment settled; evidence is attached.
    Confirmed,
    /// The payment failed or was voided provider-side.
    Failed,
}

/// A normalized reconciliation event, as parsed from a webhook body.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    /// The reservation the event refers to.
    pub reservation_id: String,

    /// What the provider observed.
    pub status: ProviderStatus,

    /// Rail-tagged payment evidence; required for `confirmed` events.
    #[serde(default)]
    pub evidence: Option<Evidence>,

    /// Provider-side failure reason; used for `failed` events.
    #[serde(default)]
    pub reason: Option<String>,

    /// Provider-side event id, logged for correlation.
    #[serde(default)]
    pub event_id: Option<String>,
}

/// What the gateway did with an inbound event.
///
/// A transport adapter should acknowledge (HTTP 2xx) every `Ok` outcome -
/// including `Discarded` - and signal retry on `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event drove a reservation transition (or replayed one
    /// idempotently).
    Applied {
        reservation_id: String,
        status: ReservationStatus,
    },
    /// The event can never be applied; acknowledged and logged so the
    /// provider stops retrying.
    Discarded { reason: String },
    /// The event arrived for an expired slot; recorded as a
    /// reconciliation anomaly for manual follow-up.
    Anomaly { reservation_id: String },
}

// =============================================================================
// Gateway
// =============================================================================

/// The reconciliation gateway.
pub struct ReconciliationGateway<S> {
    engine: Arc<AllocationEngine<S>>,
    verifier: Arc<CredentialVerifier>,
}

impl<S: RateSource> ReconciliationGateway<S> {
    /// Creates a gateway over the engine and credential verifier.
    pub fn new(engine: Arc<AllocationEngine<S>>, verifier: Arc<CredentialVerifier>) -> Self {
        ReconciliationGateway { engine, verifier }
    }

    /// Ingests one inbound reconciliation event.
    ///
    /// `bearer` is the raw bearer token (without the "Bearer " prefix);
    /// `body` is the raw request body.
    pub async fn ingest(&self, bearer: Option<&str>, body: &str) -> EngineResult<IngestOutcome> {
        let token = bearer.ok_or_else(|| {
            EngineError::Unauthorized("missing authorization credential".to_string())
        })?;
        let claims = self.verifier.verify(CredentialScope::Reconcile, token)?;

        let event: ProviderEvent = match serde_json::from_str(body) {
            Ok(event) => event,
            Err(e) => {
                // Acknowledged-but-logged: this body will never parse, so
                // making the provider retry it forever helps no one.
                warn!(provider = %claims.sub, error = %e, "Discarding malformed webhook payload");
                return Ok(IngestOutcome::Discarded {
                    reason: format!("invalid payload: {}", e),
                });
            }
        };

        info!(
            provider = %claims.sub,
            reservation_id = %event.reservation_id,
            status = ?event.status,
            event_id = event.event_id.as_deref().unwrap_or("-"),
            "Reconciliation event received"
        );

        match event.status {
            ProviderStatus::Confirmed => self.apply_confirmation(event).await,
            ProviderStatus::Failed => self.apply_failure(event).await,
        }
    }

    async fn apply_confirmation(&self, event: ProviderEvent) -> EngineResult<IngestOutcome> {
        let evidence = match event.evidence {
            Some(evidence) => evidence,
            None => {
                warn!(
                    reservation_id = %event.reservation_id,
                    "Discarding confirmed event without evidence"
                );
                return Ok(IngestOutcome::Discarded {
                    reason: "confirmed event carries no evidence".to_string(),
                });
            }
        };

        match self.engine.confirm(&event.reservation_id, evidence).await {
            Ok(reservation) => Ok(IngestOutcome::Applied {
                reservation_id: reservation.id,
                status: reservation.status,
            }),
            Err(e) => self.map_engine_error(&event.reservation_id, e),
        }
    }

    async fn apply_failure(&self, event: ProviderEvent) -> EngineResult<IngestOutcome> {
        let reason = event
            .reason
            .unwrap_or_else(|| "provider reported failure".to_string());

        match self.engine.reject(&event.reservation_id, &reason).await {
            Ok(reservation) => Ok(IngestOutcome::Applied {
                reservation_id: reservation.id,
                status: reservation.status,
            }),
            Err(e) => self.map_engine_error(&event.reservation_id, e),
        }
    }

    /// Maps engine failures into the ack/retry contract.
    fn map_engine_error(
        &self,
        reservation_id: &str,
        error: EngineError,
    ) -> EngineResult<IngestOutcome> {
        match error {
            // The anomaly row is already written by the engine; acknowledge
            // so the provider stops retrying a slot that is gone.
            EngineError::ReservationExpired { reservation_id } => {
                Ok(IngestOutcome::Anomaly { reservation_id })
            }

            // Terminal conflicts and unknown references cannot be fixed by
            // a provider retry: acknowledge and log.
            EngineError::AlreadyTerminal { status, .. } => {
                warn!(reservation_id, %status, "Event conflicts with terminal reservation; discarding");
                Ok(IngestOutcome::Discarded {
                    reason: format!("reservation is already {}", status),
                })
            }
            EngineError::NotFound { .. } => {
                warn!(reservation_id, "Event references unknown reservation; discarding");
                Ok(IngestOutcome::Discarded {
                    reason: "unknown reservation".to_string(),
                })
            }
            e if e.is_validation() => {
                warn!(reservation_id, error = %e, "Event failed validation; discarding");
                Ok(IngestOutcome::Discarded {
                    reason: e.to_string(),
                })
            }

            // Storage/transient failures: surface, so the provider retries
            // after we recover. The engine's idempotent transitions make
            // the retry safe.
            e => Err(e),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
