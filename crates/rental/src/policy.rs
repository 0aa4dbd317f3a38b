use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use rentledger_core::BorrowerId;

use crate::violation::RentalViolation;

/// Default number of simultaneous rentals a borrower may hold.
pub const DEFAULT_QUOTA: usize = 2;

/// Default rental term in calendar months.
pub const DEFAULT_TERM_MONTHS: u32 = 1;

/// Rental rules that are configuration rather than structure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalPolicy {
    /// Maximum number of current episodes one borrower may hold.
    pub quota: usize,
    /// Length of a rental in calendar months; drives `return_date`.
    pub term_months: u32,
    /// Serialize quota decisions per borrower inside the rent transaction.
    ///
    /// Off: the quota is a point-in-time read before the transaction, so two
    /// concurrent rents for one borrower on different units may both pass.
    pub strict_quota: bool,
}

impl Default for RentalPolicy {
    fn default() -> Self {
        Self {
            quota: DEFAULT_QUOTA,
            term_months: DEFAULT_TERM_MONTHS,
            strict_quota: false,
        }
    }
}

impl RentalPolicy {
    /// Fail if a borrower already holding `held` rentals may not take another.
    pub fn check_quota(&self, borrower_id: &BorrowerId, held: usize) -> Result<(), RentalViolation> {
        if held >= self.quota {
            return Err(RentalViolation::QuotaExceeded {
                borrower_id: borrower_id.clone(),
                held,
                quota: self.quota,
            });
        }
        Ok(())
    }

    /// Return date for a rental starting at `start`.
    ///
    /// Calendar arithmetic: Jan 31 + 1 month clamps to the end of February.
    pub fn return_date(&self, start: DateTime<Utc>) -> Result<DateTime<Utc>, RentalViolation> {
        start
            .checked_add_months(Months::new(self.term_months))
            .ok_or(RentalViolation::ReturnDateOutOfRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn borrower() -> BorrowerId {
        BorrowerId::parse("s-1").unwrap()
    }

    #[test]
    fn quota_allows_below_limit() {
        let policy = RentalPolicy::default();
        assert!(policy.check_quota(&borrower(), 0).is_ok());
        assert!(policy.check_quota(&borrower(), 1).is_ok());
    }

    #[test]
    fn quota_rejects_at_limit() {
        let policy = RentalPolicy::default();
        let err = policy.check_quota(&borrower(), 2).unwrap_err();
        assert_eq!(
            err,
            RentalViolation::QuotaExceeded {
                borrower_id: borrower(),
                held: 2,
                quota: 2
            }
        );
    }

    #[test]
    fn return_date_is_one_calendar_month_later() {
        let policy = RentalPolicy::default();
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let due = policy.return_date(start).unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap());
    }

    #[test]
    fn custom_term_is_respected() {
        let policy = RentalPolicy {
            term_months: 3,
            ..RentalPolicy::default()
        };
        let start = Utc.with_ymd_and_hms(2026, 5, 10, 8, 30, 0).unwrap();
        assert_eq!(
            policy.return_date(start).unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 10, 8, 30, 0).unwrap()
        );
    }
}
