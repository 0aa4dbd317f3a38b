//! Rental transaction engine (application-level orchestration).
//!
//! Every mutating operation follows the same pipeline:
//!
//! ```text
//! call
//!   ↓
//! 1. Validate arguments (no IO)
//!   ↓
//! 2. Check preconditions against auto-committed reads (no locks)
//!   ↓
//! 3. Begin transaction
//!   ↓
//! 4. Locked re-read (SELECT … FOR UPDATE) and pure transition
//!   ↓
//! 5. Write the row(s)
//!   ↓
//! 6. Commit, or roll back and report
//! ```
//!
//! Step 2 rejects the common failures cheaply; step 4 is what makes the
//! operation correct under concurrency, because a competing caller may have
//! changed the unit between the two reads.
//!
//! ## Failure Semantics
//!
//! - argument and precondition failures leave the ledger untouched and never
//!   open a transaction
//! - failures after `begin` roll back explicitly before surfacing; if the
//!   rollback itself fails its message is appended to the reported error
//! - a transaction that is dropped (cancelled future, panic) rolls back and
//!   releases its locks

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use rentledger_core::{BorrowerId, InstrumentId, Money, UnitId};
use rentledger_rental::{NewUnit, RentalEpisode, RentalPolicy, Termination};

use crate::error::RentalError;
use crate::ledger_store::{EpisodeFilter, LedgerStore, LedgerTransaction};
use crate::query::QueryService;

/// Executes rent / terminate / provision against a [`LedgerStore`].
///
/// The engine owns its store handle; there is no global connection. It holds
/// no mutable state of its own, so one instance can serve any number of
/// concurrent callers (each call runs its own transaction).
#[derive(Debug, Clone)]
pub struct RentalEngine<S> {
    queries: QueryService<S>,
    policy: RentalPolicy,
}

impl<S> RentalEngine<S>
where
    S: LedgerStore,
{
    pub fn new(store: S, policy: RentalPolicy) -> Self {
        Self {
            queries: QueryService::new(store),
            policy,
        }
    }

    /// Read side sharing this engine's store.
    pub fn queries(&self) -> &QueryService<S> {
        &self.queries
    }

    pub fn policy(&self) -> &RentalPolicy {
        &self.policy
    }

    fn store(&self) -> &S {
        self.queries.store()
    }

    /// Rent the unit's current (available) episode to `borrower_id`.
    ///
    /// Returns the updated episode: borrower set, return date one rental
    /// term from now.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: empty unit or borrower id
    /// - `InstrumentUnavailable`: unknown unit, already rented, or lost a race
    ///   to a concurrent rent
    /// - `QuotaExceeded`: borrower already at quota
    /// - `StorageUnavailable`: backend unreachable before the transaction began
    /// - `TransactionFailed`: anything that broke the transaction
    #[instrument(skip(self), err)]
    pub async fn rent(&self, unit_id: &str, borrower_id: &str) -> Result<RentalEpisode, RentalError> {
        let unit_id = UnitId::parse(unit_id)?;
        let borrower_id = BorrowerId::parse(borrower_id)?;

        let current = self
            .store()
            .find_current(&unit_id)
            .await
            .map_err(|e| RentalError::storage("rent", e))?;
        if !current.is_some_and(|listing| listing.episode.is_available()) {
            return Err(RentalError::InstrumentUnavailable { unit_id });
        }

        let held = self
            .store()
            .list_current(&EpisodeFilter::held_by(borrower_id.clone()))
            .await
            .map_err(|e| RentalError::storage("rent", e))?
            .len();
        self.policy.check_quota(&borrower_id, held)?;

        let mut tx = self
            .store()
            .begin()
            .await
            .map_err(|e| RentalError::storage("rent", e))?;

        let outcome = self.rent_locked(tx.as_mut(), &unit_id, &borrower_id).await;
        match outcome {
            Ok(rented) => {
                tx.commit()
                    .await
                    .map_err(|e| RentalError::transaction("rent", e))?;
                info!(
                    unit_id = %unit_id,
                    borrower_id = %borrower_id,
                    episode_id = %rented.episode_id(),
                    "instrument rented"
                );
                Ok(rented)
            }
            Err(err) => Err(abort(tx, "rent", err).await),
        }
    }

    async fn rent_locked(
        &self,
        tx: &mut dyn LedgerTransaction,
        unit_id: &UnitId,
        borrower_id: &BorrowerId,
    ) -> Result<RentalEpisode, RentalError> {
        // Lock order: borrower, then the target unit. No other unit is locked.
        if self.policy.strict_quota {
            tx.lock_borrower(borrower_id)
                .await
                .map_err(|e| RentalError::transaction("rent", e))?;
            let held = tx
                .list_current_for_borrower(borrower_id)
                .await
                .map_err(|e| RentalError::transaction("rent", e))?
                .len();
            self.policy.check_quota(borrower_id, held)?;
        }

        let current = tx
            .find_current_for_update(unit_id)
            .await
            .map_err(|e| RentalError::transaction("rent", e))?;
        let Some(current) = current.filter(RentalEpisode::is_available) else {
            debug!(unit_id = %unit_id, "unit taken by a concurrent rent");
            return Err(RentalError::InstrumentUnavailable {
                unit_id: unit_id.clone(),
            });
        };

        let rented = current.rent(borrower_id, Utc::now(), &self.policy)?;
        tx.update_episode(&rented)
            .await
            .map_err(|e| RentalError::transaction("rent", e))?;
        Ok(rented)
    }

    /// End the unit's current rental.
    ///
    /// The rented episode is closed and a fresh available episode (same unit,
    /// instrument, condition and monthly cost) is appended, atomically.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: empty unit id
    /// - `NotFound`: the unit has no current episode
    /// - `NotCurrentlyRented`: the unit is available, or was returned
    ///   concurrently
    /// - `StorageUnavailable` / `TransactionFailed`: as for [`rent`](Self::rent)
    #[instrument(skip(self), err)]
    pub async fn terminate(&self, unit_id: &str) -> Result<Termination, RentalError> {
        let unit_id = UnitId::parse(unit_id)?;

        let current = self
            .store()
            .find_current(&unit_id)
            .await
            .map_err(|e| RentalError::storage("terminate rental", e))?;
        match current {
            None => return Err(RentalError::NotFound(format!("instrument unit {unit_id}"))),
            Some(listing) if !listing.episode.is_rented() => {
                return Err(RentalError::NotCurrentlyRented { unit_id });
            }
            Some(_) => {}
        }

        let mut tx = self
            .store()
            .begin()
            .await
            .map_err(|e| RentalError::storage("terminate rental", e))?;

        let outcome = terminate_locked(tx.as_mut(), &unit_id).await;
        match outcome {
            Ok(termination) => {
                tx.commit()
                    .await
                    .map_err(|e| RentalError::transaction("terminate rental", e))?;
                info!(
                    unit_id = %unit_id,
                    closed_episode_id = %termination.closed.episode_id(),
                    successor_episode_id = %termination.successor.episode_id(),
                    "rental terminated"
                );
                Ok(termination)
            }
            Err(err) => Err(abort(tx, "terminate rental", err).await),
        }
    }

    /// Create the first, available episode of a new physical unit.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: empty unit id or condition
    /// - `AlreadyProvisioned`: the unit already has a current episode
    /// - `NotFound`: `instrument_id` is not in the catalog
    #[instrument(skip(self), err)]
    pub async fn provision(
        &self,
        unit_id: &str,
        instrument_id: InstrumentId,
        condition: &str,
        monthly_cost: Money,
    ) -> Result<RentalEpisode, RentalError> {
        let episode = RentalEpisode::provision(NewUnit {
            unit_id: UnitId::parse(unit_id)?,
            instrument_id,
            condition: condition.to_string(),
            monthly_cost,
        })?;

        let mut tx = self
            .store()
            .begin()
            .await
            .map_err(|e| RentalError::storage("provision unit", e))?;

        let outcome = provision_locked(tx.as_mut(), &episode).await;
        match outcome {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| RentalError::transaction("provision unit", e))?;
                info!(
                    unit_id = %episode.unit_id(),
                    instrument_id = %instrument_id,
                    episode_id = %episode.episode_id(),
                    "unit provisioned"
                );
                Ok(episode)
            }
            Err(err) => Err(abort(tx, "provision unit", err).await),
        }
    }
}

async fn terminate_locked(
    tx: &mut dyn LedgerTransaction,
    unit_id: &UnitId,
) -> Result<Termination, RentalError> {
    let current = tx
        .find_current_for_update(unit_id)
        .await
        .map_err(|e| RentalError::transaction("terminate rental", e))?;
    let Some(current) = current.filter(RentalEpisode::is_rented) else {
        debug!(unit_id = %unit_id, "unit returned by a concurrent terminate");
        return Err(RentalError::NotCurrentlyRented {
            unit_id: unit_id.clone(),
        });
    };

    let termination = current.terminate(Utc::now())?;
    tx.update_episode(&termination.closed)
        .await
        .map_err(|e| RentalError::transaction("terminate rental", e))?;
    tx.insert_episode(&termination.successor)
        .await
        .map_err(|e| RentalError::transaction("terminate rental", e))?;
    Ok(termination)
}

async fn provision_locked(
    tx: &mut dyn LedgerTransaction,
    episode: &RentalEpisode,
) -> Result<(), RentalError> {
    let existing = tx
        .find_current_for_update(episode.unit_id())
        .await
        .map_err(|e| RentalError::transaction("provision unit", e))?;
    if existing.is_some() {
        return Err(RentalError::AlreadyProvisioned {
            unit_id: episode.unit_id().clone(),
        });
    }

    let known = tx
        .instrument_exists(episode.instrument_id())
        .await
        .map_err(|e| RentalError::transaction("provision unit", e))?;
    if !known {
        return Err(RentalError::NotFound(format!(
            "instrument {}",
            episode.instrument_id()
        )));
    }

    tx.insert_episode(episode)
        .await
        .map_err(|e| RentalError::transaction("provision unit", e))
}

/// Roll back after `err`, folding a rollback failure into the result.
async fn abort(
    tx: Box<dyn LedgerTransaction>,
    operation: &'static str,
    err: RentalError,
) -> RentalError {
    match tx.rollback().await {
        Ok(()) => {
            debug!(operation, error = %err, "transaction rolled back");
            err
        }
        Err(rollback) => {
            warn!(operation, error = %err, rollback_error = %rollback, "rollback failed");
            err.with_rollback_failure(operation, rollback)
        }
    }
}
