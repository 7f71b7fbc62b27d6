//! Donation eligibility rules.
//!
//! A donor may give blood again once at least [`MIN_DONATION_INTERVAL_DAYS`] whole days
//! have passed since their last donation. Whole days are the floor of the millisecond
//! difference divided by one day, so a candidate 89 days and 23 hours later is still
//! ineligible. All functions here are pure.

use crate::errors::{Error, Result};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Minimum number of whole days between two donations.
pub const MIN_DONATION_INTERVAL_DAYS: i64 = 90;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Parses a date or timestamp into a UTC instant.
///
/// Accepts `YYYY-MM-DD` (midnight UTC), RFC 3339 timestamps with an offset, and
/// `YYYY-MM-DDTHH:MM:SS` without one (taken as UTC).
pub fn parse_instant(field: &'static str, value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::default()));
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(stamp.naive_utc());
    }
    if let Ok(stamp) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(stamp);
    }
    Err(Error::InvalidDate {
        field,
        value: value.to_string(),
    })
}

/// Parses a date or timestamp and keeps only its calendar date (UTC).
pub fn parse_calendar_date(field: &'static str, value: &str) -> Result<NaiveDate> {
    parse_instant(field, value).map(|instant| instant.date())
}

/// Whole days from `earlier` to `later`, rounded towards negative infinity.
#[must_use]
pub fn days_between(later: NaiveDateTime, earlier: NaiveDateTime) -> i64 {
    (later - earlier).num_milliseconds().div_euclid(MS_PER_DAY)
}

/// Decides whether a donation on `candidate_date` respects the minimum interval.
///
/// When `candidate_date` is `None` the comparison date is `now`: "book for today"
/// and "book for a future date" are therefore judged against different instants.
///
/// # Errors
/// [`Error::InvalidDate`] if either input does not parse to a calendar date.
pub fn is_eligible(
    candidate_date: Option<&str>,
    last_donation_date: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    elapsed_days(candidate_date, last_donation_date, now)
        .map(|elapsed| elapsed >= MIN_DONATION_INTERVAL_DAYS)
}

/// Like [`is_eligible`] but reports a violation as [`Error::EligibilityViolation`].
pub fn ensure_eligible(
    candidate_date: Option<&str>,
    last_donation_date: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let elapsed = elapsed_days(candidate_date, last_donation_date, now)?;
    if elapsed < MIN_DONATION_INTERVAL_DAYS {
        return Err(Error::EligibilityViolation {
            elapsed_days: elapsed,
            required_days: MIN_DONATION_INTERVAL_DAYS,
        });
    }
    Ok(())
}

fn elapsed_days(
    candidate_date: Option<&str>,
    last_donation_date: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let last = parse_instant("last_donation_date", last_donation_date)?;
    let candidate = match candidate_date {
        Some(value) => parse_instant("appointment_date", value)?,
        None => now.naive_utc(),
    };
    Ok(days_between(candidate, last))
}

/// Earliest date a donor may give again after a donation tested on `tested_on`.
#[must_use]
pub fn next_eligible_date(tested_on: NaiveDate) -> NaiveDate {
    tested_on
        .checked_add_days(Days::new(MIN_DONATION_INTERVAL_DAYS.unsigned_abs()))
        .unwrap_or(NaiveDate::MAX)
}
