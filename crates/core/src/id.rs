//! Strongly-typed identifiers used across the ledger.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Identifier of a single ledger row (one rental episode).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(Uuid);

/// Identifier of a catalog instrument (model/type description).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(Uuid);

/// Identifier of a physical instrument unit.
///
/// Stable across every episode of the unit's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId(String);

/// Identifier of a borrower (student).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BorrowerId(String);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

/// Upper bound on the length of externally supplied codes.
const MAX_CODE_LEN: usize = 64;

macro_rules! impl_code_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Parse an externally supplied code.
            ///
            /// Surrounding whitespace is ignored; empty or overlong codes are rejected.
            pub fn parse(raw: &str) -> DomainResult<Self> {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{} cannot be empty", $name)));
                }
                if trimmed.len() > MAX_CODE_LEN {
                    return Err(DomainError::invalid_id(format!(
                        "{} longer than {} bytes",
                        $name, MAX_CODE_LEN
                    )));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_uuid_newtype!(EpisodeId, "EpisodeId");
impl_uuid_newtype!(InstrumentId, "InstrumentId");
impl_code_newtype!(UnitId, "UnitId");
impl_code_newtype!(BorrowerId, "BorrowerId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_trimmed() {
        let unit = UnitId::parse("  R-104 ").unwrap();
        assert_eq!(unit.as_str(), "R-104");
        assert_eq!(unit.to_string(), "R-104");
    }

    #[test]
    fn empty_codes_are_rejected() {
        assert!(matches!(UnitId::parse(""), Err(DomainError::InvalidId(_))));
        assert!(matches!(BorrowerId::parse("   "), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn overlong_codes_are_rejected() {
        let raw = "x".repeat(MAX_CODE_LEN + 1);
        assert!(BorrowerId::parse(&raw).is_err());
    }

    #[test]
    fn deserializing_a_blank_code_fails() {
        let res: Result<BorrowerId, _> = serde_json::from_str("\" \"");
        assert!(res.is_err());

        let ok: BorrowerId = serde_json::from_str("\"s-17\"").unwrap();
        assert_eq!(ok.as_str(), "s-17");
    }

    #[test]
    fn uuid_ids_round_trip_through_display() {
        let id = EpisodeId::new();
        let parsed: EpisodeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<InstrumentId>().is_err());
    }
}
