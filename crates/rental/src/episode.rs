use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rentledger_core::{BorrowerId, DomainError, EpisodeId, InstrumentId, Money, UnitId};

use crate::policy::RentalPolicy;
use crate::violation::RentalViolation;

/// Who, if anyone, holds the unit during an episode.
///
/// Borrower and return date only exist together, which makes the
/// `available ⇔ no borrower ⇔ no return date` rule structural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Occupancy {
    Available,
    Rented {
        borrower_id: BorrowerId,
        return_date: DateTime<Utc>,
    },
}

/// One chapter of a physical unit's rental history (one ledger row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalEpisode {
    episode_id: EpisodeId,
    unit_id: UnitId,
    instrument_id: InstrumentId,
    condition: String,
    monthly_cost: Money,
    occupancy: Occupancy,
    closed_at: Option<DateTime<Utc>>,
}

/// Input for provisioning the first episode of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUnit {
    pub unit_id: UnitId,
    pub instrument_id: InstrumentId,
    pub condition: String,
    pub monthly_cost: Money,
}

/// Outcome of closing a rented episode: the closed row and its successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    pub closed: RentalEpisode,
    pub successor: RentalEpisode,
}

impl RentalEpisode {
    /// Create the first, available episode of a freshly provisioned unit.
    pub fn provision(unit: NewUnit) -> Result<Self, DomainError> {
        let condition = unit.condition.trim();
        if condition.is_empty() {
            return Err(DomainError::validation("condition cannot be empty"));
        }

        Ok(Self {
            episode_id: EpisodeId::new(),
            unit_id: unit.unit_id,
            instrument_id: unit.instrument_id,
            condition: condition.to_string(),
            monthly_cost: unit.monthly_cost,
            occupancy: Occupancy::Available,
            closed_at: None,
        })
    }

    /// Rebuild an episode from already-validated parts (storage boundary).
    pub(crate) fn restore(
        episode_id: EpisodeId,
        unit_id: UnitId,
        instrument_id: InstrumentId,
        condition: String,
        monthly_cost: Money,
        occupancy: Occupancy,
        closed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            episode_id,
            unit_id,
            instrument_id,
            condition,
            monthly_cost,
            occupancy,
            closed_at,
        }
    }

    pub fn episode_id(&self) -> EpisodeId {
        self.episode_id
    }

    pub fn unit_id(&self) -> &UnitId {
        &self.unit_id
    }

    pub fn instrument_id(&self) -> InstrumentId {
        self.instrument_id
    }

    pub fn condition(&self) -> &str {
        &self.condition
    }

    pub fn monthly_cost(&self) -> Money {
        self.monthly_cost
    }

    pub fn occupancy(&self) -> &Occupancy {
        &self.occupancy
    }

    pub fn borrower_id(&self) -> Option<&BorrowerId> {
        match &self.occupancy {
            Occupancy::Available => None,
            Occupancy::Rented { borrower_id, .. } => Some(borrower_id),
        }
    }

    pub fn return_date(&self) -> Option<DateTime<Utc>> {
        match &self.occupancy {
            Occupancy::Available => None,
            Occupancy::Rented { return_date, .. } => Some(*return_date),
        }
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn is_terminated(&self) -> bool {
        self.closed_at.is_some()
    }

    /// True iff this is the current episode and nobody holds the unit.
    pub fn is_available(&self) -> bool {
        !self.is_terminated() && self.occupancy == Occupancy::Available
    }

    /// True iff this is the current episode and a borrower holds the unit.
    pub fn is_rented(&self) -> bool {
        !self.is_terminated() && matches!(self.occupancy, Occupancy::Rented { .. })
    }

    /// Attach `borrower_id` to this (current, available) episode.
    ///
    /// Returns the mutated copy; `self` is left untouched so callers can stage
    /// the write and discard it on rollback.
    pub fn rent(
        &self,
        borrower_id: &BorrowerId,
        now: DateTime<Utc>,
        policy: &RentalPolicy,
    ) -> Result<Self, RentalViolation> {
        if !self.is_available() {
            return Err(RentalViolation::Unavailable(self.unit_id.clone()));
        }

        let return_date = policy.return_date(now)?;
        Ok(Self {
            occupancy: Occupancy::Rented {
                borrower_id: borrower_id.clone(),
                return_date,
            },
            ..self.clone()
        })
    }

    /// Close this (current, rented) episode and spawn its available successor.
    ///
    /// The successor copies unit, instrument, condition and monthly cost.
    pub fn terminate(&self, now: DateTime<Utc>) -> Result<Termination, RentalViolation> {
        if !self.is_rented() {
            return Err(RentalViolation::NotRented(self.unit_id.clone()));
        }

        let closed = Self {
            closed_at: Some(now),
            ..self.clone()
        };
        let successor = Self {
            episode_id: EpisodeId::new(),
            unit_id: self.unit_id.clone(),
            instrument_id: self.instrument_id,
            condition: self.condition.clone(),
            monthly_cost: self.monthly_cost,
            occupancy: Occupancy::Available,
            closed_at: None,
        };

        Ok(Termination { closed, successor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_unit() -> NewUnit {
        NewUnit {
            unit_id: UnitId::parse("R-100").unwrap(),
            instrument_id: InstrumentId::new(),
            condition: "good".to_string(),
            monthly_cost: Money::from_minor(19_900).unwrap(),
        }
    }

    fn borrower(code: &str) -> BorrowerId {
        BorrowerId::parse(code).unwrap()
    }

    #[test]
    fn provisioned_episode_is_available() {
        let ep = RentalEpisode::provision(test_unit()).unwrap();
        assert!(ep.is_available());
        assert!(!ep.is_terminated());
        assert!(ep.borrower_id().is_none());
        assert!(ep.return_date().is_none());
    }

    #[test]
    fn provision_requires_condition() {
        let mut unit = test_unit();
        unit.condition = " ".to_string();
        assert!(RentalEpisode::provision(unit).is_err());
    }

    #[test]
    fn rent_attaches_borrower_and_return_date() {
        let ep = RentalEpisode::provision(test_unit()).unwrap();
        let now = Utc::now();
        let rented = ep.rent(&borrower("s-1"), now, &RentalPolicy::default()).unwrap();

        assert_eq!(rented.episode_id(), ep.episode_id());
        assert_eq!(rented.borrower_id(), Some(&borrower("s-1")));
        assert!(rented.return_date().unwrap() > now);
        assert!(!rented.is_available());
        assert!(rented.is_rented());
    }

    #[test]
    fn rent_rejects_rented_episode() {
        let ep = RentalEpisode::provision(test_unit()).unwrap();
        let rented = ep.rent(&borrower("s-1"), Utc::now(), &RentalPolicy::default()).unwrap();
        let err = rented
            .rent(&borrower("s-2"), Utc::now(), &RentalPolicy::default())
            .unwrap_err();
        assert!(matches!(err, RentalViolation::Unavailable(_)));
    }

    #[test]
    fn terminate_rejects_available_episode() {
        let ep = RentalEpisode::provision(test_unit()).unwrap();
        assert!(matches!(
            ep.terminate(Utc::now()),
            Err(RentalViolation::NotRented(_))
        ));
    }

    #[test]
    fn terminate_closes_and_spawns_successor() {
        let ep = RentalEpisode::provision(test_unit()).unwrap();
        let rented = ep.rent(&borrower("s-1"), Utc::now(), &RentalPolicy::default()).unwrap();
        let now = Utc::now();
        let Termination { closed, successor } = rented.terminate(now).unwrap();

        assert!(closed.is_terminated());
        assert_eq!(closed.closed_at(), Some(now));
        assert_eq!(closed.borrower_id(), Some(&borrower("s-1")));
        assert!(!closed.is_available());

        assert_ne!(successor.episode_id(), closed.episode_id());
        assert_eq!(successor.unit_id(), closed.unit_id());
        assert_eq!(successor.condition(), closed.condition());
        assert_eq!(successor.monthly_cost(), closed.monthly_cost());
        assert!(successor.is_available());
    }

    #[test]
    fn terminated_episode_cannot_be_reused() {
        let ep = RentalEpisode::provision(test_unit()).unwrap();
        let rented = ep.rent(&borrower("s-1"), Utc::now(), &RentalPolicy::default()).unwrap();
        let closed = rented.terminate(Utc::now()).unwrap().closed;

        assert!(closed.rent(&borrower("s-2"), Utc::now(), &RentalPolicy::default()).is_err());
        assert!(closed.terminate(Utc::now()).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Rent(u8),
        Terminate,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![(0u8..3).prop_map(Op::Rent), Just(Op::Terminate)]
    }

    proptest! {
        #[test]
        fn episode_chain_keeps_invariants(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let policy = RentalPolicy::default();
            let mut chain = vec![RentalEpisode::provision(test_unit()).unwrap()];
            let mut closed_snapshots: Vec<RentalEpisode> = Vec::new();

            for op in ops {
                let idx = chain.iter().position(|e| !e.is_terminated()).unwrap();
                let current = chain[idx].clone();
                match op {
                    Op::Rent(b) => {
                        if let Ok(next) = current.rent(&borrower(&format!("s-{b}")), Utc::now(), &policy) {
                            chain[idx] = next;
                        }
                    }
                    Op::Terminate => {
                        if let Ok(t) = current.terminate(Utc::now()) {
                            closed_snapshots.push(t.closed.clone());
                            chain[idx] = t.closed;
                            chain.push(t.successor);
                        }
                    }
                }

                // Exactly one current episode.
                prop_assert_eq!(chain.iter().filter(|e| !e.is_terminated()).count(), 1);

                // Availability consistency on the current episode.
                let current = chain.iter().find(|e| !e.is_terminated()).unwrap();
                prop_assert_eq!(current.is_available(), current.borrower_id().is_none());
                prop_assert_eq!(current.borrower_id().is_none(), current.return_date().is_none());

                // Closed chapters never change.
                for snapshot in &closed_snapshots {
                    let stored = chain.iter().find(|e| e.episode_id() == snapshot.episode_id()).unwrap();
                    prop_assert_eq!(stored, snapshot);
                }
            }
        }
    }
}
