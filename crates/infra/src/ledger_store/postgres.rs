//! Postgres-backed ledger store implementation.
//!
//! Persists the instrument catalog and the append-only episode table.
//! Transaction-scoped advisory locks keyed by unit id (taken before the
//! `SELECT … FOR UPDATE` row lock) serialize rent, terminate and provision on
//! the same unit, including a unit that has no row yet. Advisory locks keyed by
//! borrower id serialize strict quota decisions. Lock order is always borrower,
//! then unit.
//!
//! ## Expected Schema
//!
//! Provisioning is external; the adapter assumes:
//!
//! ```sql
//! CREATE TABLE instrument (
//!     instrument_id    UUID PRIMARY KEY,
//!     name             TEXT NOT NULL,
//!     kind             TEXT NOT NULL,
//!     brand            TEXT NOT NULL,
//!     base_cost_minor  BIGINT NOT NULL CHECK (base_cost_minor >= 0)
//! );
//!
//! CREATE TABLE rental_episode (
//!     episode_id          UUID PRIMARY KEY,
//!     unit_id             TEXT NOT NULL,
//!     instrument_id       UUID NOT NULL REFERENCES instrument (instrument_id),
//!     borrower_id         TEXT NULL,
//!     available           BOOLEAN NOT NULL,
//!     condition           TEXT NOT NULL,
//!     monthly_cost_minor  BIGINT NOT NULL CHECK (monthly_cost_minor >= 0),
//!     return_date         TIMESTAMPTZ NULL,
//!     closed_at           TIMESTAMPTZ NULL,
//!     terminated          BOOLEAN NOT NULL DEFAULT FALSE
//! );
//!
//! -- One current episode per unit.
//! CREATE UNIQUE INDEX rental_episode_current_unit
//!     ON rental_episode (unit_id) WHERE NOT terminated;
//! CREATE INDEX rental_episode_current_borrower
//!     ON rental_episode (borrower_id) WHERE NOT terminated;
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerStoreError |
//! |------------|----------------------|------------------|
//! | Database (unique / FK / check violation) | `23505` / `23503` / `23514` | `Constraint` |
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | Database (connection exception / shutdown) | `08***` / `57P0*` | `Unavailable` |
//! | Database (other) | Any other | `Query` |
//! | Io / Tls / PoolTimedOut / PoolClosed | N/A | `Unavailable` |
//! | ColumnDecode / Decode | N/A | `Corrupt` |
//! | Other | N/A | `Query` |
//!
//! ## Thread Safety
//!
//! `PostgresLedgerStore` is `Send + Sync` and cheap to clone; every operation
//! checks a connection out of the shared SQLx pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};

use rentledger_core::{BorrowerId, InstrumentId, Money, UnitId};
use rentledger_inventory::{Instrument, NewInstrument};
use rentledger_rental::{EpisodeRecord, RentalEpisode};

use super::r#trait::{EpisodeFilter, EpisodeListing, LedgerStore, LedgerStoreError, LedgerTransaction};
use crate::config::LedgerConfig;

/// Postgres-backed rental ledger.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    lock_timeout: Option<Duration>,
}

impl PostgresLedgerStore {
    /// Create a new PostgresLedgerStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: None,
        }
    }

    /// Bound locking reads inside transactions (`SET LOCAL lock_timeout`).
    pub fn with_lock_timeout(mut self, limit: Option<Duration>) -> Self {
        self.lock_timeout = limit;
        self
    }

    /// Build a pool from configuration.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerStoreError> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            LedgerStoreError::Unavailable("no database URL configured".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool).with_lock_timeout(config.lock_timeout))
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(row_count = tracing::field::Empty), err)]
    async fn list_current(
        &self,
        filter: &EpisodeFilter,
    ) -> Result<Vec<EpisodeListing>, LedgerStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                e.episode_id,
                e.unit_id,
                e.instrument_id,
                e.borrower_id,
                e.available,
                e.condition,
                e.monthly_cost_minor,
                e.return_date,
                e.closed_at,
                e.terminated,
                i.name,
                i.kind,
                i.brand,
                i.base_cost_minor
            FROM rental_episode e
            JOIN instrument i ON i.instrument_id = e.instrument_id
            WHERE NOT e.terminated
                AND ($1::text IS NULL OR i.name = $1)
                AND (NOT $2 OR e.available)
                AND ($3::text IS NULL OR e.borrower_id = $3)
            ORDER BY i.name ASC, e.unit_id ASC
            "#,
        )
        .bind(filter.name.as_deref())
        .bind(filter.available_only)
        .bind(filter.borrower_id.as_ref().map(|b| b.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_current", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(listing_from_row).collect()
    }

    #[instrument(skip(self), fields(unit_id = %unit_id), err)]
    async fn find_current(
        &self,
        unit_id: &UnitId,
    ) -> Result<Option<EpisodeListing>, LedgerStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                e.episode_id,
                e.unit_id,
                e.instrument_id,
                e.borrower_id,
                e.available,
                e.condition,
                e.monthly_cost_minor,
                e.return_date,
                e.closed_at,
                e.terminated,
                i.name,
                i.kind,
                i.brand,
                i.base_cost_minor
            FROM rental_episode e
            JOIN instrument i ON i.instrument_id = e.instrument_id
            WHERE e.unit_id = $1 AND NOT e.terminated
            "#,
        )
        .bind(unit_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_current", e))?;

        row.as_ref().map(listing_from_row).transpose()
    }

    #[instrument(skip(self), fields(unit_id = %unit_id), err)]
    async fn history(&self, unit_id: &UnitId) -> Result<Vec<RentalEpisode>, LedgerStoreError> {
        // Closed chapters first (by close time), the current episode last.
        let rows = sqlx::query(
            r#"
            SELECT
                episode_id,
                unit_id,
                instrument_id,
                borrower_id,
                available,
                condition,
                monthly_cost_minor,
                return_date,
                closed_at,
                terminated
            FROM rental_episode
            WHERE unit_id = $1
            ORDER BY terminated DESC, closed_at ASC NULLS LAST, episode_id ASC
            "#,
        )
        .bind(unit_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;

        rows.iter().map(episode_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn list_instruments(&self) -> Result<Vec<Instrument>, LedgerStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT instrument_id, name, kind, brand, base_cost_minor
            FROM instrument
            ORDER BY name ASC, instrument_id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_instruments", e))?;

        rows.iter()
            .map(|row| {
                InstrumentRow::from_row(row)
                    .map_err(|e| map_sqlx_error("decode_instrument", e))?
                    .into_instrument()
            })
            .collect()
    }

    #[instrument(skip(self, instrument), fields(instrument_id = %instrument.id_typed()), err)]
    async fn register_instrument(&self, instrument: &Instrument) -> Result<(), LedgerStoreError> {
        sqlx::query(
            r#"
            INSERT INTO instrument (
                instrument_id,
                name,
                kind,
                brand,
                base_cost_minor
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (instrument_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                kind = EXCLUDED.kind,
                brand = EXCLUDED.brand,
                base_cost_minor = EXCLUDED.base_cost_minor
            "#,
        )
        .bind(instrument.id_typed().as_uuid())
        .bind(instrument.name())
        .bind(instrument.kind())
        .bind(instrument.brand())
        .bind(instrument.base_cost().minor())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_instrument", e))?;

        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(limit) = self.lock_timeout {
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", limit.as_millis()))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        }

        Ok(Box::new(PostgresLedgerTransaction { tx }))
    }
}

const UNIT_LOCK_SCOPE: &str = "unit";
const BORROWER_LOCK_SCOPE: &str = "borrower";

/// Text hashed into a transaction-scoped advisory lock id.
fn advisory_key(scope: &str, id: &str) -> String {
    format!("rentledger.{scope}:{id}")
}

/// Open Postgres transaction.
///
/// SQLx rolls a dropped `Transaction` back when its connection returns to the
/// pool, which releases every row and advisory lock taken through it.
pub struct PostgresLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresLedgerTransaction {
    async fn advisory_lock(&mut self, key: &str, operation: &str) -> Result<(), LedgerStoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerTransaction for PostgresLedgerTransaction {
    #[instrument(skip(self), fields(unit_id = %unit_id), err)]
    async fn find_current_for_update(
        &mut self,
        unit_id: &UnitId,
    ) -> Result<Option<RentalEpisode>, LedgerStoreError> {
        // Row locks cannot cover a unit with no current row yet (provisioning),
        // so every locking read of a unit also takes the unit's advisory lock.
        self.advisory_lock(&advisory_key(UNIT_LOCK_SCOPE, unit_id.as_str()), "lock_unit")
            .await?;

        let row = sqlx::query(
            r#"
            SELECT
                episode_id,
                unit_id,
                instrument_id,
                borrower_id,
                available,
                condition,
                monthly_cost_minor,
                return_date,
                closed_at,
                terminated
            FROM rental_episode
            WHERE unit_id = $1 AND NOT terminated
            FOR UPDATE
            "#,
        )
        .bind(unit_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_current_for_update", e))?;

        row.as_ref().map(episode_from_row).transpose()
    }

    #[instrument(skip(self), fields(borrower_id = %borrower_id), err)]
    async fn lock_borrower(&mut self, borrower_id: &BorrowerId) -> Result<(), LedgerStoreError> {
        self.advisory_lock(
            &advisory_key(BORROWER_LOCK_SCOPE, borrower_id.as_str()),
            "lock_borrower",
        )
        .await
    }

    #[instrument(skip(self), fields(borrower_id = %borrower_id), err)]
    async fn list_current_for_borrower(
        &mut self,
        borrower_id: &BorrowerId,
    ) -> Result<Vec<RentalEpisode>, LedgerStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                episode_id,
                unit_id,
                instrument_id,
                borrower_id,
                available,
                condition,
                monthly_cost_minor,
                return_date,
                closed_at,
                terminated
            FROM rental_episode
            WHERE borrower_id = $1 AND NOT terminated
            ORDER BY unit_id ASC
            "#,
        )
        .bind(borrower_id.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_current_for_borrower", e))?;

        rows.iter().map(episode_from_row).collect()
    }

    async fn instrument_exists(&mut self, instrument_id: InstrumentId) -> Result<bool, LedgerStoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM instrument WHERE instrument_id = $1) AS present",
        )
        .bind(instrument_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("instrument_exists", e))?;

        row.try_get::<bool, _>("present")
            .map_err(|e| map_sqlx_error("instrument_exists", e))
    }

    #[instrument(skip(self, episode), fields(episode_id = %episode.episode_id()), err)]
    async fn update_episode(&mut self, episode: &RentalEpisode) -> Result<(), LedgerStoreError> {
        let record = EpisodeRecord::from(episode);

        // Condition and monthly cost are creation snapshots and never rewritten.
        let result = sqlx::query(
            r#"
            UPDATE rental_episode
            SET
                borrower_id = $3,
                available = $4,
                return_date = $5,
                closed_at = $6,
                terminated = $7
            WHERE episode_id = $1 AND unit_id = $2 AND NOT terminated
            "#,
        )
        .bind(record.episode_id.as_uuid())
        .bind(&record.unit_id)
        .bind(record.borrower_id.as_deref())
        .bind(record.available)
        .bind(record.return_date)
        .bind(record.closed_at)
        .bind(record.terminated)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_episode", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerStoreError::Constraint(format!(
                "episode {} is unknown or already closed",
                record.episode_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, episode), fields(episode_id = %episode.episode_id()), err)]
    async fn insert_episode(&mut self, episode: &RentalEpisode) -> Result<(), LedgerStoreError> {
        let record = EpisodeRecord::from(episode);

        sqlx::query(
            r#"
            INSERT INTO rental_episode (
                episode_id,
                unit_id,
                instrument_id,
                borrower_id,
                available,
                condition,
                monthly_cost_minor,
                return_date,
                closed_at,
                terminated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.episode_id.as_uuid())
        .bind(&record.unit_id)
        .bind(record.instrument_id.as_uuid())
        .bind(record.borrower_id.as_deref())
        .bind(record.available)
        .bind(&record.condition)
        .bind(record.monthly_cost_minor)
        .bind(record.return_date)
        .bind(record.closed_at)
        .bind(record.terminated)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_episode", e))?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerStoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerStoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

/// Map SQLx errors to LedgerStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") | Some("23503") | Some("23514") => LedgerStoreError::Constraint(msg),
                Some("55P03") => LedgerStoreError::LockTimeout(msg),
                Some(code) if code.starts_with("08") || code.starts_with("57P0") => {
                    LedgerStoreError::Unavailable(msg)
                }
                _ => LedgerStoreError::Query(msg),
            }
        }
        sqlx::Error::Io(e) => {
            LedgerStoreError::Unavailable(format!("io error in {}: {}", operation, e))
        }
        sqlx::Error::Tls(e) => {
            LedgerStoreError::Unavailable(format!("tls error in {}: {}", operation, e))
        }
        sqlx::Error::PoolTimedOut => {
            LedgerStoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            LedgerStoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            LedgerStoreError::Corrupt(format!("failed to decode row in {}: {}", operation, err))
        }
        _ => LedgerStoreError::Query(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn episode_from_row(row: &PgRow) -> Result<RentalEpisode, LedgerStoreError> {
    EpisodeRow::from_row(row)
        .map_err(|e| map_sqlx_error("decode_episode", e))?
        .into_episode()
}

fn listing_from_row(row: &PgRow) -> Result<EpisodeListing, LedgerStoreError> {
    let episode = episode_from_row(row)?;
    let instrument = InstrumentRow::from_row(row)
        .map_err(|e| map_sqlx_error("decode_instrument", e))?
        .into_instrument()?;
    Ok(EpisodeListing { episode, instrument })
}

// SQLx row types

#[derive(Debug)]
struct EpisodeRow {
    episode_id: uuid::Uuid,
    unit_id: String,
    instrument_id: uuid::Uuid,
    borrower_id: Option<String>,
    available: bool,
    condition: String,
    monthly_cost_minor: i64,
    return_date: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    terminated: bool,
}

impl<'r> sqlx::FromRow<'r, PgRow> for EpisodeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EpisodeRow {
            episode_id: row.try_get("episode_id")?,
            unit_id: row.try_get("unit_id")?,
            instrument_id: row.try_get("instrument_id")?,
            borrower_id: row.try_get("borrower_id")?,
            available: row.try_get("available")?,
            condition: row.try_get("condition")?,
            monthly_cost_minor: row.try_get("monthly_cost_minor")?,
            return_date: row.try_get("return_date")?,
            closed_at: row.try_get("closed_at")?,
            terminated: row.try_get("terminated")?,
        })
    }
}

impl EpisodeRow {
    fn into_episode(self) -> Result<RentalEpisode, LedgerStoreError> {
        let record = EpisodeRecord {
            episode_id: self.episode_id.into(),
            unit_id: self.unit_id,
            instrument_id: self.instrument_id.into(),
            borrower_id: self.borrower_id,
            available: self.available,
            condition: self.condition,
            monthly_cost_minor: self.monthly_cost_minor,
            return_date: self.return_date,
            closed_at: self.closed_at,
            terminated: self.terminated,
        };
        RentalEpisode::try_from(record).map_err(|e| LedgerStoreError::Corrupt(e.to_string()))
    }
}

#[derive(Debug)]
struct InstrumentRow {
    instrument_id: uuid::Uuid,
    name: String,
    kind: String,
    brand: String,
    base_cost_minor: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for InstrumentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InstrumentRow {
            instrument_id: row.try_get("instrument_id")?,
            name: row.try_get("name")?,
            kind: row.try_get("kind")?,
            brand: row.try_get("brand")?,
            base_cost_minor: row.try_get("base_cost_minor")?,
        })
    }
}

impl InstrumentRow {
    fn into_instrument(self) -> Result<Instrument, LedgerStoreError> {
        let base_cost = Money::from_minor(self.base_cost_minor)
            .map_err(|e| LedgerStoreError::Corrupt(e.to_string()))?;
        Instrument::new(NewInstrument {
            id: InstrumentId::from_uuid(self.instrument_id),
            name: self.name,
            kind: self.kind,
            brand: self.brand,
            base_cost,
        })
        .map_err(|e| LedgerStoreError::Corrupt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available_row() -> EpisodeRow {
        EpisodeRow {
            episode_id: uuid::Uuid::now_v7(),
            unit_id: "G-1".to_string(),
            instrument_id: uuid::Uuid::now_v7(),
            borrower_id: None,
            available: true,
            condition: "good".to_string(),
            monthly_cost_minor: 12_000,
            return_date: None,
            closed_at: None,
            terminated: false,
        }
    }

    #[test]
    fn pool_failures_map_to_unavailable() {
        assert!(matches!(
            map_sqlx_error("list_current", sqlx::Error::PoolClosed),
            LedgerStoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("list_current", sqlx::Error::PoolTimedOut),
            LedgerStoreError::Unavailable(_)
        ));
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            map_sqlx_error("begin_transaction", sqlx::Error::Io(io)),
            LedgerStoreError::Unavailable(_)
        ));
    }

    #[test]
    fn advisory_keys_are_scoped_per_kind() {
        assert_eq!(advisory_key(UNIT_LOCK_SCOPE, "S1"), "rentledger.unit:S1");
        assert_ne!(
            advisory_key(UNIT_LOCK_SCOPE, "S1"),
            advisory_key(BORROWER_LOCK_SCOPE, "S1")
        );
    }

    #[test]
    fn other_failures_map_to_query() {
        assert!(matches!(
            map_sqlx_error("find_current", sqlx::Error::RowNotFound),
            LedgerStoreError::Query(_)
        ));
    }

    #[test]
    fn consistent_row_becomes_episode() {
        let episode = available_row().into_episode().unwrap();
        assert!(episode.is_available());
        assert_eq!(episode.unit_id().as_str(), "G-1");
    }

    #[test]
    fn inconsistent_flags_are_reported_as_corrupt() {
        let mut row = available_row();
        row.borrower_id = Some("s-1".to_string());
        assert!(matches!(row.into_episode(), Err(LedgerStoreError::Corrupt(_))));

        let mut row = available_row();
        row.terminated = true;
        assert!(matches!(row.into_episode(), Err(LedgerStoreError::Corrupt(_))));
    }

    #[test]
    fn negative_base_cost_is_corrupt() {
        let row = InstrumentRow {
            instrument_id: uuid::Uuid::now_v7(),
            name: "cello".to_string(),
            kind: "string".to_string(),
            brand: "Stentor".to_string(),
            base_cost_minor: -5,
        };
        assert!(matches!(row.into_instrument(), Err(LedgerStoreError::Corrupt(_))));
    }
}
