//! Stability classification for catalog periods
//!
//! PRISM re-releases recent grids as more station data arrives. Archive filenames carry
//! the release tag, so the catalog has to guess which tag a period is currently
//! published under. The guess is purely date based and relative to a reference date.

use super::period::Period;
use crate::StabilityCode;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Default number of months a period stays provisional after it ends
pub const DEFAULT_PROVISIONAL_MONTHS: u32 = 6;

/// Date-based rules for assigning a [`StabilityCode`] to a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityPolicy {
    /// Periods ending within this many months of the reference date are provisional
    pub provisional_months: u32,
    /// Periods ending within this many days of the reference date are early
    pub early_window_days: Option<u32>,
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        Self {
            provisional_months: DEFAULT_PROVISIONAL_MONTHS,
            early_window_days: None,
        }
    }
}

impl StabilityPolicy {
    /// Classify `period` relative to `reference`
    pub fn classify(&self, period: &Period, reference: NaiveDate) -> StabilityCode {
        let age_days = reference.signed_duration_since(period.end).num_days();

        if let Some(window) = self.early_window_days {
            if age_days < i64::from(window) {
                return StabilityCode::Early;
            }
        }

        let provisional_cutoff = reference
            .checked_sub_months(Months::new(self.provisional_months))
            .unwrap_or(NaiveDate::MIN);

        if period.end >= provisional_cutoff {
            StabilityCode::Provisional
        } else {
            StabilityCode::Stable
        }
    }
}
