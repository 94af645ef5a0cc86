//! Calendar values and the normalization rules behind date arithmetic.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// A date cell payload: calendar day, optional intra-day time, optional zone.
///
/// Small enough to live inline in a value cell. The time component is
/// nanoseconds since midnight; the zone is minutes east of UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Date {
    pub year: i16,
    pub month: u8,
    pub day: u8,
    pub nanos: Option<i64>,
    pub zone: Option<i16>,
}

impl Date {
    /// Builds a date, normalizing out-of-range components.
    ///
    /// Nonexistent dates roll forward to the next valid day (Feb 30 becomes
    /// Mar 1 or Mar 2 depending on leap year), matching the language's
    /// historical arithmetic. Month overflow rolls the year.
    #[must_use]
    pub fn new_normalized(year: i32, month: i32, day: i32) -> Self {
        let months_total = year * 12 + (month - 1);
        let norm_year = months_total.div_euclid(12);
        let norm_month = months_total.rem_euclid(12) + 1;
        // Anchor at the first of the month and let day overflow carry.
        let base = NaiveDate::from_ymd_opt(norm_year, norm_month as u32, 1)
            .unwrap_or_else(|| panic!("month normalization produced invalid {norm_year}-{norm_month}"));
        let date = base + Duration::days(i64::from(day) - 1);
        Self {
            year: date.year() as i16,
            month: date.month() as u8,
            day: date.day() as u8,
            nanos: None,
            zone: None,
        }
    }

    #[must_use]
    pub fn with_time(mut self, nanos: i64, zone: Option<i16>) -> Self {
        self.nanos = Some(nanos);
        self.zone = zone;
        self
    }

    /// Adds a day count, renormalizing through the calendar.
    #[must_use]
    pub fn add_days(self, days: i64) -> Self {
        let base = NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))
            .expect("stored dates are always normalized");
        let date = base + Duration::days(days);
        Self {
            year: date.year() as i16,
            month: date.month() as u8,
            day: date.day() as u8,
            ..self
        }
    }

    /// Days between two dates (`self - other`).
    #[must_use]
    pub fn days_between(self, other: Self) -> i64 {
        let a = NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))
            .expect("stored dates are always normalized");
        let b = NaiveDate::from_ymd_opt(i32::from(other.year), u32::from(other.month), u32::from(other.day))
            .expect("stored dates are always normalized");
        (a - b).num_days()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_dates_pass_through() {
        let d = Date::new_normalized(2000, 2, 29);
        assert_eq!((d.year, d.month, d.day), (2000, 2, 29));
    }

    #[test]
    fn nonexistent_dates_roll_forward() {
        // 1999 is not a leap year: Feb 30 lands on Mar 2.
        let d = Date::new_normalized(1999, 2, 30);
        assert_eq!((d.year, d.month, d.day), (1999, 3, 2));
        // 2000 is: Feb 30 lands on Mar 1.
        let d = Date::new_normalized(2000, 2, 30);
        assert_eq!((d.year, d.month, d.day), (2000, 3, 1));
    }

    #[test]
    fn month_overflow_rolls_year() {
        let d = Date::new_normalized(1999, 14, 1);
        assert_eq!((d.year, d.month, d.day), (2000, 2, 1));
        let d = Date::new_normalized(2000, 0, 15);
        assert_eq!((d.year, d.month, d.day), (1999, 12, 15));
    }

    #[test]
    fn add_days_crosses_month() {
        let d = Date::new_normalized(2000, 1, 31).add_days(1);
        assert_eq!((d.year, d.month, d.day), (2000, 2, 1));
    }

    #[test]
    fn days_between_is_signed() {
        let a = Date::new_normalized(2000, 1, 2);
        let b = Date::new_normalized(2000, 1, 1);
        assert_eq!(a.days_between(b), 1);
        assert_eq!(b.days_between(a), -1);
    }
}
