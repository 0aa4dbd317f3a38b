//! Rental ledger storage boundary.
//!
//! This module defines the infrastructure-facing abstraction over the episode
//! table and instrument catalog, together with an in-memory adapter (tests/dev)
//! and a Postgres adapter.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{EpisodeFilter, EpisodeListing, LedgerStore, LedgerStoreError, LedgerTransaction};
