//! Retry policy for multi-cycle acquisitions.
//
// A failed cycle (digitizer timeout, non-ok status, reconstruction error) does not
// consume a requested-cycle slot; the same cycle index is retried. The run survives
// as long as the number of failures stays within the budget computed here.

use crate::error::FtsError;

/// One failure is tolerated per this many requested cycles (rounded up), i.e. 20%.
pub const CYCLES_PER_TOLERATED_FAILURE: usize = 5;

/// Decides whether a run may continue after a given number of failed cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureBudget {
    requested: usize,
    allowed: usize,
}

impl FailureBudget {
    /// Budget for a run of `requested` cycles.
    ///
    /// Up to `ceil(0.2 * requested)` failures are tolerated. A single-cycle run
    /// tolerates none.
    pub fn for_cycles(requested: usize) -> Self {
        let allowed = if requested <= 1 {
            0
        } else {
            requested.div_ceil(CYCLES_PER_TOLERATED_FAILURE)
        };
        Self { requested, allowed }
    }

    /// Number of failures the run can absorb.
    pub fn allowed(&self) -> usize {
        self.allowed
    }

    /// Number of cycles the budget was computed for.
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Returns true once `failures` exceeds the budget.
    pub fn is_exhausted(&self, failures: usize) -> bool {
        failures > self.allowed
    }

    /// Checks `failures` against the budget, producing the run-level error on overrun.
    pub fn check(&self, failures: usize) -> Result<(), FtsError> {
        if self.is_exhausted(failures) {
            Err(FtsError::TooManyFailures {
                failed: failures,
                allowed: self.allowed,
                requested: self.requested,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_for_ten_cycles() {
        let budget = FailureBudget::for_cycles(10);
        assert_eq!(budget.allowed(), 2);
        assert!(budget.check(2).is_ok());
        assert!(matches!(
            budget.check(3),
            Err(FtsError::TooManyFailures {
                failed: 3,
                allowed: 2,
                requested: 10
            })
        ));
    }

    #[test]
    fn test_budget_rounds_up() {
        assert_eq!(FailureBudget::for_cycles(2).allowed(), 1);
        assert_eq!(FailureBudget::for_cycles(5).allowed(), 1);
        assert_eq!(FailureBudget::for_cycles(6).allowed(), 2);
        assert_eq!(FailureBudget::for_cycles(11).allowed(), 3);
        assert_eq!(FailureBudget::for_cycles(35).allowed(), 7);
    }

    #[test]
    fn test_single_cycle_is_strict() {
        let budget = FailureBudget::for_cycles(1);
        assert_eq!(budget.allowed(), 0);
        assert!(!budget.is_exhausted(0));
        assert!(budget.is_exhausted(1));
    }
}
