//! Repository implementations for the Vesta ledger.
//!
//! One repository per aggregate. The reservation repository additionally
//! owns the atomic transition primitives - the only code anywhere that
//! writes sale capacity counters.

pub mod anomaly;
pub mod distribution;
pub mod reservation;
pub mod sale;

pub use anomaly::AnomalyRepository;
pub use distribution::DistributionRepository;
pub use reservation::ReservationRepository;
pub use sale::SaleRepository;
