use chrono::{Duration, NaiveDate};

use crate::error::{Error, Result};

/// Rolling windows offered to the user, in days.
pub const ROLLING_WINDOWS: &[u32] = &[30, 7, 1];

/// Check that `days` is one of the offered rolling windows.
pub fn rolling_window(days: u32) -> Result<u32> {
    if ROLLING_WINDOWS.contains(&days) {
        Ok(days)
    } else {
        Err(Error::InvalidWindow(format!(
            "{days}d rolling window (expected one of 30, 7, 1)"
        )))
    }
}

/// How far back the default chart range reaches for a rolling window.
pub fn lookback_days(rolling_window_days: u32) -> i64 {
    match rolling_window_days {
        30 => 361,
        7 => 91,
        _ => 31,
    }
}

/// Default chart range ending yesterday.
pub fn default_date_range(rolling_window_days: u32, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (
        today - Duration::days(lookback_days(rolling_window_days)),
        today - Duration::days(1),
    )
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| Error::InvalidValue {
        column: "date".to_string(),
        message: format!("{s}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_rolling_window() {
        assert_eq!(rolling_window(7).unwrap(), 7);
        assert!(matches!(rolling_window(14), Err(Error::InvalidWindow(_))));
    }

    #[test]
    fn test_default_date_range() {
        let today = date("2025-06-15");
        assert_eq!(
            default_date_range(30, today),
            (date("2024-06-19"), date("2025-06-14"))
        );
        assert_eq!(
            default_date_range(7, today),
            (date("2025-03-16"), date("2025-06-14"))
        );
        assert_eq!(
            default_date_range(1, today),
            (date("2025-05-15"), date("2025-06-14"))
        );
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date(" 2025-02-28 ").unwrap(), date("2025-02-28"));
        assert!(matches!(
            parse_date("2025-02-30"),
            Err(Error::InvalidValue { .. })
        ));
    }
}
