//! Monetary amounts.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Non-negative monetary amount in minor currency units (öre).
///
/// Costs are snapshots taken when an episode is created; no arithmetic is provided.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(minor: i64) -> DomainResult<Self> {
        if minor < 0 {
            return Err(DomainError::validation("amount cannot be negative"));
        }
        Ok(Self(minor))
    }

    pub fn minor(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Money {
    type Error = DomainError;

    fn try_from(minor: i64) -> Result<Self, Self::Error> {
        Self::from_minor(minor)
    }
}

impl From<Money> for i64 {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02} kr", self.0 / 100, self.0 % 100)
    }
}
