//! Run dates for back-filling a time series.

use chrono::{Days, NaiveDate};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("step must be at least one day")]
    ZeroStep,
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(text: &str) -> Result<NaiveDate, DateRangeError> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| DateRangeError::InvalidDate(text.to_string()))
}

/// Dates from `start` (inclusive) to `end` (exclusive), `step_days` apart.
pub fn date_range(
    start: NaiveDate,
    end: NaiveDate,
    step_days: u64,
) -> Result<Vec<NaiveDate>, DateRangeError> {
    if step_days == 0 {
        return Err(DateRangeError::ZeroStep);
    }
    let mut dates = Vec::new();
    let mut current = start;
    while current < end {
        dates.push(current);
        match current.checked_add_days(Days::new(step_days)) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(dates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(text: &str) -> NaiveDate {
        parse_date(text).unwrap()
    }

    #[test]
    fn test_daily_range_excludes_end() {
        assert_eq!(
            date_range(d("2016-02-27"), d("2016-03-02"), 1).unwrap(),
            vec![d("2016-02-27"), d("2016-02-28"), d("2016-02-29"), d("2016-03-01")]
        );
    }

    #[test]
    fn test_skip_days() {
        assert_eq!(
            date_range(d("2016-01-01"), d("2016-01-08"), 3).unwrap(),
            vec![d("2016-01-01"), d("2016-01-04"), d("2016-01-07")]
        );
    }

    #[test]
    fn test_empty_and_invalid_ranges() {
        assert!(date_range(d("2016-01-02"), d("2016-01-02"), 1).unwrap().is_empty());
        assert!(date_range(d("2016-01-05"), d("2016-01-02"), 1).unwrap().is_empty());
        assert_eq!(
            date_range(d("2016-01-01"), d("2016-01-02"), 0),
            Err(DateRangeError::ZeroStep)
        );
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert_eq!(
            parse_date("2016/01/01"),
            Err(DateRangeError::InvalidDate("2016/01/01".to_string()))
        );
    }
}
