//! `rentledger-core`: shared building blocks for the rental ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod money;

pub use error::{DomainError, DomainResult};
pub use id::{BorrowerId, EpisodeId, InstrumentId, UnitId};
pub use money::Money;
