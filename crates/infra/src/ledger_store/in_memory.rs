use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use rentledger_core::{BorrowerId, InstrumentId, UnitId};
use rentledger_inventory::Instrument;
use rentledger_rental::RentalEpisode;

use super::r#trait::{EpisodeFilter, EpisodeListing, LedgerStore, LedgerStoreError, LedgerTransaction};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Unit(UnitId),
    Borrower(BorrowerId),
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LockKey::Unit(id) => write!(f, "unit {id}"),
            LockKey::Borrower(id) => write!(f, "borrower {id}"),
        }
    }
}

/// Row locks: one async mutex per unit / borrower, created on first use.
///
/// Entries nobody holds or waits on (only the table's own `Arc` is left) are
/// pruned whenever a new handle is taken, so the table tracks live locks only.
#[derive(Debug, Default)]
struct LockTable {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    fn handle(&self, key: &LockKey) -> Result<Arc<AsyncMutex<()>>, LedgerStoreError> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }
}

#[derive(Debug, Default)]
struct Faults {
    offline: AtomicBool,
    fail_inserts: AtomicBool,
    fail_rollbacks: AtomicBool,
}

#[derive(Debug, Default)]
struct LedgerState {
    instruments: HashMap<InstrumentId, Instrument>,
    /// Append order is ledger order.
    episodes: Vec<RentalEpisode>,
}

impl LedgerState {
    fn listing(&self, episode: &RentalEpisode) -> Result<EpisodeListing, LedgerStoreError> {
        let instrument = self
            .instruments
            .get(&episode.instrument_id())
            .cloned()
            .ok_or_else(|| {
                LedgerStoreError::Corrupt(format!(
                    "episode {} references unknown instrument {}",
                    episode.episode_id(),
                    episode.instrument_id()
                ))
            })?;
        Ok(EpisodeListing {
            episode: episode.clone(),
            instrument,
        })
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: RwLock<LedgerState>,
    locks: LockTable,
    faults: Faults,
    lock_timeout: Option<Duration>,
}

impl Inner {
    fn check_online(&self) -> Result<(), LedgerStoreError> {
        if self.faults.offline.load(Ordering::SeqCst) {
            return Err(LedgerStoreError::Unavailable(
                "in-memory ledger is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, LedgerStoreError> {
        self.check_online()?;
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, LedgerStoreError> {
        self.check_online()?;
        self.state.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> LedgerStoreError {
    LedgerStoreError::Query("lock poisoned".to_string())
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Mirrors the Postgres adapter's semantics: reads
/// auto-commit, transactions stage their writes until commit, and locking
/// reads block on a per-unit async mutex until the holder finishes.
///
/// Fault switches (`set_offline`, `fail_inserts`, `fail_rollbacks`) let tests
/// exercise the engine's failure paths.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    inner: Arc<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every locking read by `limit`.
    pub fn with_lock_timeout(limit: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                lock_timeout: Some(limit),
                ..Inner::default()
            }),
        }
    }

    /// Simulate a lost connection: every operation fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.inner.faults.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every `insert_episode` inside a transaction fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.inner.faults.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every explicit rollback report failure (writes are still discarded).
    pub fn fail_rollbacks(&self, fail: bool) {
        self.inner.faults.fail_rollbacks.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.inner.locks.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    /// Full ledger (current and closed episodes) in append order.
    pub fn snapshot(&self) -> Vec<RentalEpisode> {
        match self.inner.state.read() {
            Ok(state) => state.episodes.clone(),
            Err(_) => vec![],
        }
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn list_current(
        &self,
        filter: &EpisodeFilter,
    ) -> Result<Vec<EpisodeListing>, LedgerStoreError> {
        let state = self.inner.read()?;
        let mut listings = Vec::new();
        for episode in state.episodes.iter().filter(|e| !e.is_terminated()) {
            let listing = state.listing(episode)?;
            if filter.matches(&listing) {
                listings.push(listing);
            }
        }
        EpisodeListing::sort(&mut listings);
        Ok(listings)
    }

    async fn find_current(
        &self,
        unit_id: &UnitId,
    ) -> Result<Option<EpisodeListing>, LedgerStoreError> {
        let state = self.inner.read()?;
        let current = state
            .episodes
            .iter()
            .find(|e| !e.is_terminated() && e.unit_id() == unit_id)
            .map(|e| state.listing(e))
            .transpose();
        current
    }

    async fn history(&self, unit_id: &UnitId) -> Result<Vec<RentalEpisode>, LedgerStoreError> {
        let state = self.inner.read()?;
        Ok(state
            .episodes
            .iter()
            .filter(|e| e.unit_id() == unit_id)
            .cloned()
            .collect())
    }

    async fn list_instruments(&self) -> Result<Vec<Instrument>, LedgerStoreError> {
        let state = self.inner.read()?;
        let mut instruments: Vec<Instrument> = state.instruments.values().cloned().collect();
        instruments.sort_by(|a, b| {
            a.name()
                .cmp(b.name())
                .then_with(|| a.id_typed().cmp(&b.id_typed()))
        });
        Ok(instruments)
    }

    async fn register_instrument(&self, instrument: &Instrument) -> Result<(), LedgerStoreError> {
        let mut state = self.inner.write()?;
        state
            .instruments
            .insert(instrument.id_typed(), instrument.clone());
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerStoreError> {
        self.inner.check_online()?;
        Ok(Box::new(InMemoryLedgerTransaction {
            inner: self.inner.clone(),
            held: HashMap::new(),
            staged: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Insert(RentalEpisode),
    Update(RentalEpisode),
}

/// Open in-memory transaction.
///
/// Writes are staged and only reach the shared state on commit. Lock guards
/// live in `held`, so dropping the transaction releases them.
pub struct InMemoryLedgerTransaction {
    inner: Arc<Inner>,
    held: HashMap<LockKey, OwnedMutexGuard<()>>,
    staged: Vec<StagedWrite>,
}

impl InMemoryLedgerTransaction {
    async fn acquire(&mut self, key: LockKey) -> Result<(), LedgerStoreError> {
        if self.held.contains_key(&key) {
            return Ok(());
        }

        let handle = self.inner.locks.handle(&key)?;
        let guard = match self.inner.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, handle.lock_owned())
                .await
                .map_err(|_| LedgerStoreError::LockTimeout(format!("waiting for {key}")))?,
            None => handle.lock_owned().await,
        };
        debug!(lock = %key, "row lock acquired");
        self.held.insert(key, guard);
        Ok(())
    }

    /// Committed episodes with this transaction's staged writes applied.
    fn visible(&self) -> Result<Vec<RentalEpisode>, LedgerStoreError> {
        let state = self.inner.read()?;
        let mut episodes = state.episodes.clone();
        drop(state);

        for write in &self.staged {
            match write {
                StagedWrite::Insert(e) => episodes.push(e.clone()),
                StagedWrite::Update(e) => {
                    if let Some(slot) = episodes
                        .iter_mut()
                        .find(|existing| existing.episode_id() == e.episode_id())
                    {
                        *slot = e.clone();
                    }
                }
            }
        }
        Ok(episodes)
    }
}

#[async_trait::async_trait]
impl LedgerTransaction for InMemoryLedgerTransaction {
    async fn find_current_for_update(
        &mut self,
        unit_id: &UnitId,
    ) -> Result<Option<RentalEpisode>, LedgerStoreError> {
        self.inner.check_online()?;
        self.acquire(LockKey::Unit(unit_id.clone())).await?;
        Ok(self
            .visible()?
            .into_iter()
            .find(|e| !e.is_terminated() && e.unit_id() == unit_id))
    }

    async fn lock_borrower(&mut self, borrower_id: &BorrowerId) -> Result<(), LedgerStoreError> {
        self.inner.check_online()?;
        self.acquire(LockKey::Borrower(borrower_id.clone())).await
    }

    async fn list_current_for_borrower(
        &mut self,
        borrower_id: &BorrowerId,
    ) -> Result<Vec<RentalEpisode>, LedgerStoreError> {
        self.inner.check_online()?;
        Ok(self
            .visible()?
            .into_iter()
            .filter(|e| !e.is_terminated() && e.borrower_id() == Some(borrower_id))
            .collect())
    }

    async fn instrument_exists(&mut self, instrument_id: InstrumentId) -> Result<bool, LedgerStoreError> {
        let state = self.inner.read()?;
        Ok(state.instruments.contains_key(&instrument_id))
    }

    async fn update_episode(&mut self, episode: &RentalEpisode) -> Result<(), LedgerStoreError> {
        self.inner.check_online()?;
        self.acquire(LockKey::Unit(episode.unit_id().clone())).await?;

        let visible = self.visible()?;
        let existing = visible
            .iter()
            .find(|e| e.episode_id() == episode.episode_id())
            .ok_or_else(|| {
                LedgerStoreError::Constraint(format!("unknown episode {}", episode.episode_id()))
            })?;
        if existing.is_terminated() {
            return Err(LedgerStoreError::Constraint(format!(
                "episode {} is closed and immutable",
                episode.episode_id()
            )));
        }
        if existing.unit_id() != episode.unit_id() {
            return Err(LedgerStoreError::Constraint(format!(
                "episode {} cannot move to another unit",
                episode.episode_id()
            )));
        }

        self.staged.push(StagedWrite::Update(episode.clone()));
        Ok(())
    }

    async fn insert_episode(&mut self, episode: &RentalEpisode) -> Result<(), LedgerStoreError> {
        self.inner.check_online()?;
        if self.inner.faults.fail_inserts.load(Ordering::SeqCst) {
            return Err(LedgerStoreError::Query("injected insert failure".to_string()));
        }
        self.acquire(LockKey::Unit(episode.unit_id().clone())).await?;

        {
            let state = self.inner.read()?;
            if !state.instruments.contains_key(&episode.instrument_id()) {
                return Err(LedgerStoreError::Constraint(format!(
                    "unknown instrument {}",
                    episode.instrument_id()
                )));
            }
        }

        let visible = self.visible()?;
        if visible.iter().any(|e| e.episode_id() == episode.episode_id()) {
            return Err(LedgerStoreError::Constraint(format!(
                "duplicate episode {}",
                episode.episode_id()
            )));
        }
        if !episode.is_terminated()
            && visible
                .iter()
                .any(|e| !e.is_terminated() && e.unit_id() == episode.unit_id())
        {
            return Err(LedgerStoreError::Constraint(format!(
                "unit {} already has a current episode",
                episode.unit_id()
            )));
        }

        self.staged.push(StagedWrite::Insert(episode.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerStoreError> {
        let mut state = self.inner.write()?;
        for write in self.staged.iter().cloned() {
            match write {
                StagedWrite::Insert(e) => state.episodes.push(e),
                StagedWrite::Update(e) => {
                    if let Some(slot) = state
                        .episodes
                        .iter_mut()
                        .find(|existing| existing.episode_id() == e.episode_id())
                    {
                        *slot = e;
                    }
                }
            }
        }
        drop(state);
        // Locks in `held` are released when `self` drops here.
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerStoreError> {
        if self.inner.faults.fail_rollbacks.load(Ordering::SeqCst) {
            return Err(LedgerStoreError::Unavailable(
                "rollback could not reach the ledger".to_string(),
            ));
        }
        Ok(())
    }
}
