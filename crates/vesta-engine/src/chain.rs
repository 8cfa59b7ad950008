//! # Chain Receipt Poller
//!
//! For crypto reservations the provider push may never come - the buyer
//! broadcasts a transaction and somebody has to watch the chain for it.
//! This module polls for a transaction receipt until it reaches the
//! configured confirmation depth, then drives the engine's `confirm` with
//! the observed evidence.
//!
//! ## Polling Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ReceiptPoller::spawn(...)  - one background task PER RESERVATION       │
//! │                                                                         │
//! │  loop:                                                                  │
//! │    sleep(backoff)            ◄── exponential, capped, bounded total     │
//! │    reservation terminal?     ──► stop (webhook or sweeper beat us)      │
//! │    receipt deep enough?      ──► engine.confirm(...) and stop           │
//! │    cancel signal?            ──► stop                                   │
//! │                                                                         │
//! │  Polling NEVER runs in a request path: the webhook handler and the      │
//! │  reservation-creation path stay free of chain RPC latency.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vesta_core::Evidence;

use crate::config::EngineConfig;
use crate::engine::AllocationEngine;
use crate::error::{EngineError, EngineResult};
use crate::oracle::RateSource;

// =============================================================================
// Chain Client Trait
// =============================================================================

/// A transaction receipt as observed on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    /// Number of confirmations the transaction has accumulated.
    pub confirmations: u32,
}

/// Abstraction over a chain RPC endpoint.
pub trait ChainClient: Send + Sync {
    /// Looks up the receipt for a transaction; `None` while unmined.
    fn transaction_receipt(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> impl Future<Output = EngineResult<Option<TxReceipt>>> + Send;
}

// =============================================================================
// Poller Configuration
// =============================================================================

/// Configuration for one receipt-polling task.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Confirmation depth required before confirming the reservation.
    pub min_confirmation_depth: u32,

    /// Initial backoff between polls.
    pub initial_backoff: Duration,

    /// Maximum backoff between polls.
    pub max_backoff: Duration,

    /// Give up after this much total elapsed time. The reservation then
    /// simply runs out its expiry and the sweeper reclaims the slot.
    pub max_elapsed: Duration,
}

impl PollerConfig {
    /// Derives the poller settings from the engine configuration.
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        PollerConfig {
            min_confirmation_depth: config.min_confirmation_depth,
            initial_backoff: Duration::from_millis(config.poll_initial_backoff_ms),
            max_backoff: Duration::from_secs(config.poll_max_backoff_secs),
            max_elapsed: Duration::from_secs(config.poll_max_elapsed_secs),
        }
    }
}

// =============================================================================
// Receipt Poller
// =============================================================================

/// Handle for a spawned receipt-polling task.
pub struct ReceiptPollerHandle {
    cancel_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ReceiptPollerHandle {
    /// Signals cancellation and waits for the task to stop.
    pub async fn cancel(self) {
        let _ = self.cancel_tx.send(()).await;
        let _ = self.task.await;
    }

    /// Whether the polling task has stopped on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns cancellable per-reservation receipt polling tasks.
pub struct ReceiptPoller;

impl ReceiptPoller {
    /// Starts polling for `tx_hash` on `chain_id` on behalf of a
    /// reservation. Returns a handle that cancels the task.
    pub fn spawn<S, C>(
        engine: Arc<AllocationEngine<S>>,
        chain: Arc<C>,
        reservation_id: String,
        chain_id: u64,
        tx_hash: String,
        config: PollerConfig,
    ) -> ReceiptPollerHandle
    where
        S: RateSource + 'static,
        C: ChainClient + 'static,
    {
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        let task = tokio::spawn(Self::run(
            engine,
            chain,
            reservation_id,
            chain_id,
            tx_hash,
            config,
            cancel_rx,
        ));

        ReceiptPollerHandle { cancel_tx, task }
    }

    async fn run<S, C>(
        engine: Arc<AllocationEngine<S>>,
        chain: Arc<C>,
        reservation_id: String,
        chain_id: u64,
        tx_hash: String,
        config: PollerConfig,
        mut cancel_rx: mpsc::Receiver<()>,
    ) where
        S: RateSource,
        C: ChainClient,
    {
        info!(
            reservation_id = %reservation_id,
            chain_id,
            tx_hash = %tx_hash,
            "Receipt poller starting"
        );

        let mut backoff = ExponentialBackoff {
            initial_interval: config.initial_backoff,
            max_interval: config.max_backoff,
            max_elapsed_time: Some(config.max_elapsed),
            ..Default::default()
        };

        loop {
            let delay = match backoff.next_backoff() {
                Some(delay) => delay,
                None => {
                    warn!(
                        reservation_id = %reservation_id,
                        tx_hash = %tx_hash,
                        "Receipt polling exhausted; leaving the reservation to its expiry"
                    );
                    break;
                }
            };

            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!(reservation_id = %reservation_id, "Receipt poller cancelled");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // Someone else (webhook, sweeper, buyer) may have resolved the
            // reservation while we slept.
            match engine
                .database()
                .reservations()
                .get_by_id(&reservation_id)
                .await
            {
                Ok(Some(reservation)) if reservation.status.is_terminal() => {
                    debug!(
                        reservation_id = %reservation_id,
                        status = %reservation.status,
                        "Reservation already resolved; poller stopping"
                    );
                    break;
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(reservation_id = %reservation_id, "Reservation vanished; poller stopping");
                    break;
                }
                Err(e) => {
                    warn!(reservation_id = %reservation_id, error = %e, "Reservation lookup failed");
                    continue;
                }
            }

            match chain.transaction_receipt(chain_id, &tx_hash).await {
                Ok(Some(receipt)) if receipt.confirmations >= config.min_confirmation_depth => {
                    let evidence = Evidence::Crypto {
                        chain_id,
                        tx_hash: tx_hash.clone(),
                    };
                    match engine.confirm(&reservation_id, evidence).await {
                        Ok(_) => {
                            info!(
                                reservation_id = %reservation_id,
                                confirmations = receipt.confirmations,
                                "Receipt reached depth; reservation confirmed"
                            );
                        }
                        Err(EngineError::ReservationExpired { .. }) => {
                            // Anomaly already recorded by the engine.
                            warn!(
                                reservation_id = %reservation_id,
                                "Receipt arrived after expiry; anomaly recorded"
                            );
                        }
                        Err(e) => {
                            warn!(reservation_id = %reservation_id, error = %e, "Confirm failed");
                        }
                    }
                    break;
                }
                Ok(Some(receipt)) => {
                    debug!(
                        reservation_id = %reservation_id,
                        confirmations = receipt.confirmations,
                        required = config.min_confirmation_depth,
                        "Receipt not deep enough yet"
                    );
                }
                Ok(None) => {
                    debug!(reservation_id = %reservation_id, "Transaction not mined yet");
                }
                Err(e) => {
                    warn!(reservation_id = %reservation_id, error = %e, "Receipt lookup failed");
                }
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
