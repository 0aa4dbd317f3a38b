use thiserror::Error;

use rentledger_core::{BorrowerId, UnitId};

/// Business-rule violation raised by pure episode transitions or the policy.
///
/// These are deterministic outcomes of the current state, not failures of the
/// system: retrying without a state change yields the same violation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RentalViolation {
    #[error("instrument {0} is not available for rent")]
    Unavailable(UnitId),

    #[error("instrument {0} is not currently rented")]
    NotRented(UnitId),

    #[error("borrower {borrower_id} already holds {held} rentals (quota {quota})")]
    QuotaExceeded {
        borrower_id: BorrowerId,
        held: usize,
        quota: usize,
    },

    #[error("return date is out of range")]
    ReturnDateOutOfRange,
}
