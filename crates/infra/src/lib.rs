//! Infrastructure layer: ledger storage, queries, the rental transaction engine
//! and configuration.

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger_store;
pub mod query;


pub use config::{ConfigError, LedgerConfig};
pub use engine::RentalEngine;
pub use error::{RentalError, RentalErrorKind};
pub use ledger_store::{
    EpisodeFilter, EpisodeListing, InMemoryLedgerStore, LedgerStore, LedgerStoreError,
    LedgerTransaction, PostgresLedgerStore,
};
pub use query::QueryService;
