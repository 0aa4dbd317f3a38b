//! Flat, column-shaped form of an episode.
//!
//! Storage adapters read and write explicit `available` / `terminated` flags
//! and nullable columns. Conversion into [`RentalEpisode`] is the only place
//! those flags are interpreted; inconsistent rows are rejected here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rentledger_core::{BorrowerId, DomainError, EpisodeId, InstrumentId, Money, UnitId};

use crate::episode::{Occupancy, RentalEpisode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub episode_id: EpisodeId,
    pub unit_id: String,
    pub instrument_id: InstrumentId,
    pub borrower_id: Option<String>,
    pub available: bool,
    pub condition: String,
    pub monthly_cost_minor: i64,
    pub return_date: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub terminated: bool,
}

impl From<&RentalEpisode> for EpisodeRecord {
    fn from(episode: &RentalEpisode) -> Self {
        Self {
            episode_id: episode.episode_id(),
            unit_id: episode.unit_id().to_string(),
            instrument_id: episode.instrument_id(),
            borrower_id: episode.borrower_id().map(|b| b.to_string()),
            available: episode.is_available(),
            condition: episode.condition().to_string(),
            monthly_cost_minor: episode.monthly_cost().minor(),
            return_date: episode.return_date(),
            closed_at: episode.closed_at(),
            terminated: episode.is_terminated(),
        }
    }
}

impl TryFrom<EpisodeRecord> for RentalEpisode {
    type Error = DomainError;

    fn try_from(record: EpisodeRecord) -> Result<Self, Self::Error> {
        let id = record.episode_id;

        if record.terminated != record.closed_at.is_some() {
            return Err(DomainError::invariant(format!(
                "episode {id}: terminated flag disagrees with closed_at"
            )));
        }

        let occupancy = match (record.borrower_id, record.return_date) {
            (None, None) => Occupancy::Available,
            (Some(borrower), Some(return_date)) => Occupancy::Rented {
                borrower_id: BorrowerId::parse(&borrower)?,
                return_date,
            },
            _ => {
                return Err(DomainError::invariant(format!(
                    "episode {id}: borrower and return date must be set together"
                )));
            }
        };

        let expect_available = !record.terminated && occupancy == Occupancy::Available;
        if record.available != expect_available {
            return Err(DomainError::invariant(format!(
                "episode {id}: available flag disagrees with borrower"
            )));
        }

        Ok(RentalEpisode::restore(
            id,
            UnitId::parse(&record.unit_id)?,
            record.instrument_id,
            record.condition,
            Money::from_minor(record.monthly_cost_minor)?,
            occupancy,
            record.closed_at,
        ))
    }
}
