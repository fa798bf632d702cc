//! Utility functions

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d_%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d_%H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Current time as fractional Unix seconds
pub fn now_timestamp() -> f64 {
    Local::now().timestamp_millis() as f64 / 1000.0
}

/// Format a Unix timestamp in local time, `YYYY-MM-DD HH:MM:SS`
pub fn format_timestamp(ts: f64) -> String {
    let secs = ts.floor() as i64;
    match Local.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{}", ts),
    }
}

/// Parse a user supplied date/time (local time) or raw Unix timestamp
pub fn parse_datetime(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if let Ok(ts) = s.parse::<f64>() {
        return Ok(ts);
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return local_timestamp(naive).ok_or_else(|| format!("{} is not a valid local time", s));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| format!("{} is out of range", s))?;
            return local_timestamp(naive).ok_or_else(|| format!("{} is not a valid local time", s));
        }
    }
    Err(format!("can't parse date/time from {}", s))
}

fn local_timestamp(naive: NaiveDateTime) -> Option<f64> {
    let dt: DateTime<Local> = naive.and_local_timezone(Local).earliest()?;
    Some(dt.timestamp() as f64)
}

/// Parse the boolean spellings accepted on the command line and in config files
pub fn string_as_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" | "enable" | "enabled" => Ok(true),
        "false" | "off" | "no" | "0" | "disable" | "disabled" => Ok(false),
        _ => Err(format!("can't parse boolean value from {}", s)),
    }
}

/// Format bytes into human-readable string (B, KB, MB)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2020-01-02 03:04:05")]
    #[case("2020-01-02_03:04:05")]
    #[case("01/02/2020 03:04:05 AM")]
    fn test_parse_datetime_formats_agree(#[case] input: &str) {
        let expected = parse_datetime("2020-01-02 03:04:05").unwrap();
        assert_eq!(parse_datetime(input).unwrap(), expected);
    }

    #[test]
    fn test_parse_date_only_is_midnight() {
        let day = parse_datetime("2020-01-02").unwrap();
        let minute = parse_datetime("2020-01-02 00:01").unwrap();
        assert_eq!(minute - day, 60.0);
        assert_eq!(parse_datetime("01/02/2020").unwrap(), day);
    }

    #[test]
    fn test_parse_raw_timestamp() {
        assert_eq!(parse_datetime("1234567890").unwrap(), 1234567890.0);
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_format_timestamp_round_trips_parse() {
        let ts = parse_datetime("2021-06-30 12:34:56").unwrap();
        assert_eq!(format_timestamp(ts), "2021-06-30 12:34:56");
    }

    #[rstest]
    #[case("yes", true)]
    #[case(" Enabled ", true)]
    #[case("1", true)]
    #[case("OFF", false)]
    #[case("disable", false)]
    fn test_string_as_bool(#[case] input: &str, #[case] expected: bool) {
        assert_eq!(string_as_bool(input), Ok(expected));
    }

    #[test]
    fn test_string_as_bool_rejects_garbage() {
        assert!(string_as_bool("maybe").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
