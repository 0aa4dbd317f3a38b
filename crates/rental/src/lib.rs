//! Rental episode domain module.
//!
//! This crate contains the business rules of the rental ledger, implemented
//! purely as deterministic domain logic (no IO, no storage, no locking).
//!
//! A physical instrument unit owns a chain of [`RentalEpisode`]s. Exactly one
//! of them is current; the rest are closed history:
//!
//! ```text
//! AVAILABLE --rent--> RENTED --terminate--> [TERMINATED] + new AVAILABLE
//! ```

pub mod episode;
pub mod policy;
pub mod record;
pub mod violation;

pub use episode::{NewUnit, Occupancy, RentalEpisode, Termination};
pub use policy::RentalPolicy;
pub use record::EpisodeRecord;
pub use violation::RentalViolation;
