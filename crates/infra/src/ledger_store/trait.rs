use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rentledger_core::{BorrowerId, InstrumentId, UnitId};
use rentledger_inventory::Instrument;
use rentledger_rental::RentalEpisode;

/// A current episode joined with its catalog instrument.
///
/// This is the row shape every Query Service listing returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeListing {
    pub episode: RentalEpisode,
    pub instrument: Instrument,
}

impl EpisodeListing {
    /// Listing order: instrument name, then unit id.
    pub fn sort(listings: &mut [EpisodeListing]) {
        listings.sort_by(|a, b| {
            a.instrument
                .name()
                .cmp(b.instrument.name())
                .then_with(|| a.episode.unit_id().cmp(b.episode.unit_id()))
        });
    }
}

/// Filter over current (non-terminated) episodes.
///
/// All criteria are conjunctive; the default matches every current episode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeFilter {
    /// Exact instrument name.
    pub name: Option<String>,
    /// Only episodes nobody holds.
    pub available_only: bool,
    /// Only episodes held by this borrower.
    pub borrower_id: Option<BorrowerId>,
}

impl EpisodeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn available() -> Self {
        Self {
            available_only: true,
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn held_by(borrower_id: BorrowerId) -> Self {
        Self {
            borrower_id: Some(borrower_id),
            ..Self::default()
        }
    }

    pub fn only_available(mut self) -> Self {
        self.available_only = true;
        self
    }

    pub fn matches(&self, listing: &EpisodeListing) -> bool {
        let episode = &listing.episode;
        if episode.is_terminated() {
            return false;
        }
        if self.available_only && !episode.is_available() {
            return false;
        }
        if let Some(name) = &self.name {
            if listing.instrument.name() != name {
                return false;
            }
        }
        if let Some(borrower_id) = &self.borrower_id {
            if episode.borrower_id() != Some(borrower_id) {
                return false;
            }
        }
        true
    }
}

/// Ledger store operation error.
///
/// These are **infrastructure errors** (connectivity, constraints, locking) as
/// opposed to rental rule violations.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    /// The backing store cannot be reached (connection refused, pool closed, IO).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A write would break a ledger constraint (second current episode,
    /// mutation of a closed episode, unknown instrument).
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A stored row could not be turned into a valid episode.
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    /// A locking read waited longer than the configured lock timeout.
    #[error("lock wait timed out: {0}")]
    LockTimeout(String),

    /// Any other failure reported by the backend.
    #[error("query failed: {0}")]
    Query(String),
}

/// The persisted ledger: instrument catalog plus the append-only episode table.
///
/// Reads on the store itself auto-commit. Anything that writes, or needs a row
/// lock, goes through a [`LedgerTransaction`] obtained from [`LedgerStore::begin`].
///
/// ## Implementation Requirements
///
/// - at most one non-terminated episode per unit, enforced on insert
/// - terminated episodes are never updated
/// - listings come back in [`EpisodeListing::sort`] order
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Current episodes matching `filter`.
    async fn list_current(
        &self,
        filter: &EpisodeFilter,
    ) -> Result<Vec<EpisodeListing>, LedgerStoreError>;

    /// The current episode of a unit, if the unit is known.
    async fn find_current(
        &self,
        unit_id: &UnitId,
    ) -> Result<Option<EpisodeListing>, LedgerStoreError>;

    /// Every episode of a unit, oldest first.
    async fn history(&self, unit_id: &UnitId) -> Result<Vec<RentalEpisode>, LedgerStoreError>;

    /// Catalog entries ordered by name.
    async fn list_instruments(&self) -> Result<Vec<Instrument>, LedgerStoreError>;

    /// Insert or replace a catalog entry.
    async fn register_instrument(&self, instrument: &Instrument) -> Result<(), LedgerStoreError>;

    /// Open a transaction. Dropping it without commit rolls back and releases locks.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerStoreError>;
}

/// One open ledger transaction.
///
/// Locks taken through this handle are held until `commit`, `rollback`, or drop.
#[async_trait::async_trait]
pub trait LedgerTransaction: Send {
    /// Exclusive read of a unit's current episode; blocks while another
    /// transaction holds the row.
    async fn find_current_for_update(
        &mut self,
        unit_id: &UnitId,
    ) -> Result<Option<RentalEpisode>, LedgerStoreError>;

    /// Serialize with every other transaction that locks the same borrower.
    async fn lock_borrower(&mut self, borrower_id: &BorrowerId) -> Result<(), LedgerStoreError>;

    /// A borrower's current episodes, read inside this transaction.
    ///
    /// Takes no row locks. Callers hold [`lock_borrower`](Self::lock_borrower)
    /// for the same borrower, so the count cannot grow underneath them.
    async fn list_current_for_borrower(
        &mut self,
        borrower_id: &BorrowerId,
    ) -> Result<Vec<RentalEpisode>, LedgerStoreError>;

    async fn instrument_exists(&mut self, instrument_id: InstrumentId) -> Result<bool, LedgerStoreError>;

    /// Overwrite a non-terminated episode row.
    async fn update_episode(&mut self, episode: &RentalEpisode) -> Result<(), LedgerStoreError>;

    /// Append a new episode row.
    async fn insert_episode(&mut self, episode: &RentalEpisode) -> Result<(), LedgerStoreError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerStoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerStoreError>;
}

#[async_trait::async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn list_current(
        &self,
        filter: &EpisodeFilter,
    ) -> Result<Vec<EpisodeListing>, LedgerStoreError> {
        (**self).list_current(filter).await
    }

    async fn find_current(
        &self,
        unit_id: &UnitId,
    ) -> Result<Option<EpisodeListing>, LedgerStoreError> {
        (**self).find_current(unit_id).await
    }

    async fn history(&self, unit_id: &UnitId) -> Result<Vec<RentalEpisode>, LedgerStoreError> {
        (**self).history(unit_id).await
    }

    async fn list_instruments(&self) -> Result<Vec<Instrument>, LedgerStoreError> {
        (**self).list_instruments().await
    }

    async fn register_instrument(&self, instrument: &Instrument) -> Result<(), LedgerStoreError> {
        (**self).register_instrument(instrument).await
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerStoreError> {
        (**self).begin().await
    }
}
