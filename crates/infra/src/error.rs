//! Errors surfaced by the query service and the rental engine.
//!
//! Raw storage errors never cross this boundary: they are classified into
//! `StorageUnavailable` (the backend cannot be reached) or `TransactionFailed`
//! (anything else that broke a read or a mutation).

use thiserror::Error;

use rentledger_core::{BorrowerId, DomainError, UnitId};
use rentledger_rental::RentalViolation;

use crate::ledger_store::LedgerStoreError;

/// Discriminant of [`RentalError`] for callers that only branch on the kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RentalErrorKind {
    InvalidArgument,
    InstrumentUnavailable,
    NotCurrentlyRented,
    QuotaExceeded,
    NotFound,
    AlreadyProvisioned,
    StorageUnavailable,
    TransactionFailed,
}

#[derive(Debug, Error)]
pub enum RentalError {
    /// Missing or malformed input; nothing was read or locked.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("instrument {unit_id} is not available for rent")]
    InstrumentUnavailable { unit_id: UnitId },

    #[error("instrument {unit_id} is not currently rented")]
    NotCurrentlyRented { unit_id: UnitId },

    #[error("borrower {borrower_id} already holds {held} rentals (quota {quota})")]
    QuotaExceeded {
        borrower_id: BorrowerId,
        held: usize,
        quota: usize,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("instrument {unit_id} is already provisioned")]
    AlreadyProvisioned { unit_id: UnitId },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A storage step failed. Inside a transaction, the transaction was rolled
    /// back; for an auto-committed read, `operation` names the read.
    #[error("could not {operation}: {message}")]
    TransactionFailed {
        operation: &'static str,
        message: String,
        #[source]
        source: Option<LedgerStoreError>,
    },
}

impl RentalError {
    pub fn kind(&self) -> RentalErrorKind {
        match self {
            Self::InvalidArgument(_) => RentalErrorKind::InvalidArgument,
            Self::InstrumentUnavailable { .. } => RentalErrorKind::InstrumentUnavailable,
            Self::NotCurrentlyRented { .. } => RentalErrorKind::NotCurrentlyRented,
            Self::QuotaExceeded { .. } => RentalErrorKind::QuotaExceeded,
            Self::NotFound(_) => RentalErrorKind::NotFound,
            Self::AlreadyProvisioned { .. } => RentalErrorKind::AlreadyProvisioned,
            Self::StorageUnavailable(_) => RentalErrorKind::StorageUnavailable,
            Self::TransactionFailed { .. } => RentalErrorKind::TransactionFailed,
        }
    }

    /// Classify a storage error raised while performing `operation`.
    ///
    /// Used for auto-committed reads and for `begin`: an unreachable backend is
    /// `StorageUnavailable`, anything else is `TransactionFailed` naming the read.
    pub fn storage(operation: &'static str, err: LedgerStoreError) -> Self {
        match err {
            LedgerStoreError::Unavailable(msg) => Self::StorageUnavailable(msg),
            other => Self::TransactionFailed {
                operation,
                message: other.to_string(),
                source: Some(other),
            },
        }
    }

    /// A storage error raised inside an open transaction.
    ///
    /// Always `TransactionFailed`, even for connectivity loss, since the
    /// transaction has been abandoned either way.
    pub fn transaction(operation: &'static str, err: LedgerStoreError) -> Self {
        Self::TransactionFailed {
            operation,
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Fold a failed rollback into the error that triggered it.
    ///
    /// The ledger state is no longer known once a rollback fails, so any kind
    /// other than `TransactionFailed` is reported as one.
    pub fn with_rollback_failure(self, operation: &'static str, rollback: LedgerStoreError) -> Self {
        match self {
            Self::TransactionFailed {
                operation,
                message,
                source,
            } => Self::TransactionFailed {
                operation,
                message: format!("{message}; rollback also failed: {rollback}"),
                source,
            },
            other => Self::TransactionFailed {
                operation,
                message: format!("{other}; rollback also failed: {rollback}"),
                source: Some(rollback),
            },
        }
    }
}

impl From<DomainError> for RentalError {
    fn from(err: DomainError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<RentalViolation> for RentalError {
    fn from(violation: RentalViolation) -> Self {
        match violation {
            RentalViolation::Unavailable(unit_id) => Self::InstrumentUnavailable { unit_id },
            RentalViolation::NotRented(unit_id) => Self::NotCurrentlyRented { unit_id },
            RentalViolation::QuotaExceeded {
                borrower_id,
                held,
                quota,
            } => Self::QuotaExceeded {
                borrower_id,
                held,
                quota,
            },
            RentalViolation::ReturnDateOutOfRange => {
                Self::InvalidArgument(RentalViolation::ReturnDateOutOfRange.to_string())
            }
        }
    }
}

impl From<LedgerStoreError> for RentalError {
    fn from(err: LedgerStoreError) -> Self {
        Self::storage("access the ledger", err)
    }
}
