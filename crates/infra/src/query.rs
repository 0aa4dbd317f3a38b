//! Read-only views over the rental ledger.
//!
//! Every call auto-commits and takes no locks. Absence is never an error: an
//! unknown unit yields `None`, an unknown name an empty list.
//!
//! Storage failures are classified by [`RentalError::storage`]: an unreachable
//! backend is `StorageUnavailable`; any other failed read (corrupt row, query
//! error) is `TransactionFailed`, whose `operation` names the read that failed
//! ("list instruments", "read the catalog", ...). No transaction is open in
//! that case.

use tracing::{Span, field, instrument};

use rentledger_core::{BorrowerId, UnitId};
use rentledger_inventory::Instrument;
use rentledger_rental::RentalEpisode;

use crate::error::RentalError;
use crate::ledger_store::{EpisodeFilter, EpisodeListing, LedgerStore};

#[derive(Debug, Clone)]
pub struct QueryService<S> {
    store: S,
}

impl<S> QueryService<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Every current episode, ordered by instrument name then unit id.
    #[instrument(skip(self), fields(row_count = field::Empty), err)]
    pub async fn list_all(&self) -> Result<Vec<EpisodeListing>, RentalError> {
        self.list(&EpisodeFilter::all()).await
    }

    /// Current episodes nobody holds.
    #[instrument(skip(self), fields(row_count = field::Empty), err)]
    pub async fn list_available(&self) -> Result<Vec<EpisodeListing>, RentalError> {
        self.list(&EpisodeFilter::available()).await
    }

    /// Current episodes whose instrument name equals `name` exactly.
    #[instrument(skip(self), fields(row_count = field::Empty), err)]
    pub async fn list_by_name(&self, name: &str) -> Result<Vec<EpisodeListing>, RentalError> {
        let filter = EpisodeFilter::named(instrument_name(name)?);
        self.list(&filter).await
    }

    #[instrument(skip(self), fields(row_count = field::Empty), err)]
    pub async fn list_available_by_name(
        &self,
        name: &str,
    ) -> Result<Vec<EpisodeListing>, RentalError> {
        let filter = EpisodeFilter::named(instrument_name(name)?).only_available();
        self.list(&filter).await
    }

    /// The unit's current episode joined with its instrument.
    #[instrument(skip(self), err)]
    pub async fn find_current(&self, unit_id: &str) -> Result<Option<EpisodeListing>, RentalError> {
        let unit_id = UnitId::parse(unit_id)?;
        self.store
            .find_current(&unit_id)
            .await
            .map_err(|e| RentalError::storage("read the current episode", e))
    }

    /// Current episodes held by the borrower (their quota usage).
    #[instrument(skip(self), fields(row_count = field::Empty), err)]
    pub async fn list_by_borrower(
        &self,
        borrower_id: &str,
    ) -> Result<Vec<EpisodeListing>, RentalError> {
        let borrower_id = BorrowerId::parse(borrower_id)?;
        self.list(&EpisodeFilter::held_by(borrower_id)).await
    }

    /// Every chapter of the unit, oldest first; the current one is last.
    #[instrument(skip(self), fields(row_count = field::Empty), err)]
    pub async fn history(&self, unit_id: &str) -> Result<Vec<RentalEpisode>, RentalError> {
        let unit_id = UnitId::parse(unit_id)?;
        let episodes = self
            .store
            .history(&unit_id)
            .await
            .map_err(|e| RentalError::storage("read unit history", e))?;
        Span::current().record("row_count", episodes.len());
        Ok(episodes)
    }

    #[instrument(skip(self), err)]
    pub async fn catalog(&self) -> Result<Vec<Instrument>, RentalError> {
        self.store
            .list_instruments()
            .await
            .map_err(|e| RentalError::storage("read the catalog", e))
    }

    async fn list(&self, filter: &EpisodeFilter) -> Result<Vec<EpisodeListing>, RentalError> {
        let listings = self
            .store
            .list_current(filter)
            .await
            .map_err(|e| RentalError::storage("list instruments", e))?;
        Span::current().record("row_count", listings.len());
        Ok(listings)
    }
}

fn instrument_name(raw: &str) -> Result<String, RentalError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(RentalError::InvalidArgument(
            "instrument name cannot be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}
