//! Calendar and rounding helpers shared across the engine
//!
//! All monetary rounding goes through [`round2`] (banker's rounding to two
//! decimal digits) so that repeated aggregation of the same inputs always
//! lands on the same cents.

use chrono::{Datelike, Days, NaiveDate};

use crate::error::{Error, Result};

/// Round to two decimal digits using banker's rounding (half to even).
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    let floor = scaled.floor();
    let diff = scaled - floor;
    // Float noise around the exact .5 boundary is resolved as a tie.
    let rounded = if (diff - 0.5).abs() < 1e-9 {
        if (floor as i64).rem_euclid(2) == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else if diff > 0.5 {
        floor + 1.0
    } else {
        floor
    };
    rounded / 100.0
}

/// Last calendar day of the given month.
pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .checked_sub_days(Days::new(1))
        .unwrap()
}

/// Number of days in the given month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    last_day_of_month(year, month).day()
}

/// First calendar day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap()
}

/// Last calendar day of the month containing `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    last_day_of_month(date.year(), date.month())
}

/// Inclusive day count between two dates. `end < start` yields 0.
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> u32 {
    if end < start {
        0
    } else {
        (end - start).num_days() as u32 + 1
    }
}

/// Canonical `YYYY-MM` label for a month.
pub fn period_label(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

/// Parse a `YYYY-MM` month string.
pub fn parse_month(s: &str) -> Result<(i32, u32)> {
    let parts: Vec<&str> = s.split('-').collect();
    let parsed = match parts.as_slice() {
        [y, m] => match (y.parse::<i32>(), m.parse::<u32>()) {
            (Ok(year), Ok(month)) if (1..=12).contains(&month) => Some((year, month)),
            _ => None,
        },
        _ => None,
    };
    parsed.ok_or_else(|| Error::InvalidData(format!("Invalid month '{}'. Use YYYY-MM", s)))
}

/// All (year, month) pairs from `start` through `end`, inclusive.
pub fn month_span(start: (i32, u32), end: (i32, u32)) -> Vec<(i32, u32)> {
    let mut months = Vec::new();
    let (mut y, mut m) = start;
    while (y, m) <= end {
        months.push((y, m));
        m += 1;
        if m > 12 {
            m = 1;
            y += 1;
        }
    }
    months
}
