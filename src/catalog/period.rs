//! Calendar periods at daily, monthly and annual resolution
//!
//! A [`Period`] is the span of days covered by one PRISM grid. Periods are built
//! from any date they contain and walked forward with [`Period::next`], which is how
//! the catalog enumerates a request's date range.

use crate::TemporalResolution;
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// One grid's worth of calendar time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    /// First day covered (inclusive)
    pub start: NaiveDate,
    /// Last day covered (inclusive)
    pub end: NaiveDate,
    /// Resolution this period belongs to
    pub resolution: TemporalResolution,
}

impl Period {
    /// Period at `resolution` that contains `date`.
    ///
    /// Returns `None` only at the edges of the representable calendar.
    pub fn containing(date: NaiveDate, resolution: TemporalResolution) -> Option<Self> {
        let (start, end) = match resolution {
            TemporalResolution::Daily => (date, date),
            TemporalResolution::Monthly => {
                let start = date.with_day(1)?;
                let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
                (start, end)
            }
            TemporalResolution::Annual => (
                NaiveDate::from_ymd_opt(date.year(), 1, 1)?,
                NaiveDate::from_ymd_opt(date.year(), 12, 31)?,
            ),
        };
        Some(Self {
            start,
            end,
            resolution,
        })
    }

    /// The period immediately following this one
    pub fn next(&self) -> Option<Self> {
        Self::containing(self.end.succ_opt()?, self.resolution)
    }

    /// Upstream period key: `YYYYMMDD`, `YYYYMM` or `YYYY`
    pub fn key(&self) -> String {
        match self.resolution {
            TemporalResolution::Daily => self.start.format("%Y%m%d").to_string(),
            TemporalResolution::Monthly => self.start.format("%Y%m").to_string(),
            TemporalResolution::Annual => self.start.format("%Y").to_string(),
        }
    }

    /// Calendar year of the period
    pub fn year(&self) -> i32 {
        self.start.year()
    }

    /// Whether any day of the period lies within `[from, to]`
    pub fn overlaps(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.start <= to && self.end >= from
    }
}

/// Every period at `resolution` with at least one day inside `[from, to]`, oldest first
pub fn periods_between(
    from: NaiveDate,
    to: NaiveDate,
    resolution: TemporalResolution,
) -> Vec<Period> {
    let mut periods = Vec::new();
    if from > to {
        return periods;
    }

    let mut current = Period::containing(from, resolution);
    while let Some(period) = current {
        if period.start > to {
            break;
        }
        periods.push(period);
        current = period.next();
    }
    periods
}
