//! Overdue day counting.
//!
//! Overdue accrues on every calendar day after the due date, rest days and
//! holidays included: the customer still holds the equipment on those days.
//! Business-day exclusions belong to up-front rental pricing only.

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::Serialize;

/// Result of counting overdue days for one rental on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverdueDays {
    /// Whole calendar days between the due date and today.
    pub total: i64,
    pub grace: i64,
    /// `total - grace`. Zero or less means the rental is inside its grace window.
    pub effective: i64,
}

impl OverdueDays {
    pub fn is_chargeable(&self) -> bool {
        self.effective > 0
    }
}

/// Counts overdue days between `end_date` and `today` (both calendar dates).
///
/// A missing or negative grace period counts as zero.
pub fn count_overdue_days(end_date: NaiveDate, today: NaiveDate, grace_days: Option<i32>) -> OverdueDays {
    let total = (today - end_date).num_days();
    let grace = i64::from(grace_days.unwrap_or(0).max(0));
    OverdueDays {
        total,
        grace,
        effective: total - grace,
    }
}

/// Truncates a timestamp to the local calendar day.
pub fn local_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

pub fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

/// First instant of `day` in local time, as UTC. Used as the selector's cutoff.
pub fn start_of_local_day(day: NaiveDate) -> DateTime<Utc> {
    let midnight = day.and_time(chrono::NaiveTime::MIN);
    match Local.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight skipped by a DST jump; fall back to treating it as UTC.
        None => Utc.from_utc_datetime(&midnight),
    }
}
