use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Date layouts seen across the relational exports, the store API and the card PDFs.
/// Month-first wins for ambiguous slashed dates.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y %B %d",
    "%B %Y %d",
    "%B %d %Y",
    "%d %B %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

/// Placeholder substituted for unparseable dates.
pub fn sentinel_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|dt| dt.date())
        })
}

/// Strict `HH:MM:SS` time of day.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let value = raw.trim();
    let bytes = value.as_bytes();
    let shaped = bytes.len() == 8
        && bytes[2] == b':'
        && bytes[5] == b':'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 2 || i == 5 || b.is_ascii_digit());

    if !shaped {
        return None;
    }
    NaiveTime::parse_from_str(value, "%H:%M:%S").ok()
}

/// Parses an integer-valued number, accepting a zero fractional part ("2012.0").
pub fn parse_whole_number(raw: &str) -> Option<i32> {
    let value = raw.trim();
    if let Ok(n) = value.parse::<i32>() {
        return Some(n);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() <= i32::MAX as f64)
        .map(|f| f as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_mixed_layouts() {
        let expected = NaiveDate::from_ymd_opt(1968, 10, 16).unwrap();
        assert_eq!(parse_date("1968-10-16"), Some(expected));
        assert_eq!(parse_date("1968 October 16"), Some(expected));
        assert_eq!(parse_date("October 1968 16"), Some(expected));
        assert_eq!(parse_date("1968/10/16"), Some(expected));
        assert_eq!(parse_date(" 1968-10-16 12:30:00 "), Some(expected));
    }

    #[test]
    fn test_rejects_garbage_dates() {
        assert_eq!(parse_date("GFJQ2AAEQ8"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("2020-02-30"), None);
    }

    #[test]
    fn test_sentinel_is_1900() {
        assert_eq!(sentinel_epoch().to_string(), "1900-01-01");
    }

    #[test]
    fn test_time_of_day_is_strict() {
        assert_eq!(
            parse_time_of_day("22:00:06"),
            NaiveTime::from_hms_opt(22, 0, 6)
        );
        assert_eq!(parse_time_of_day("2:00:06"), None);
        assert_eq!(parse_time_of_day("25:00:00"), None);
        assert_eq!(parse_time_of_day("NULL"), None);
    }

    #[test]
    fn test_whole_numbers() {
        assert_eq!(parse_whole_number("2012"), Some(2012));
        assert_eq!(parse_whole_number("7.0"), Some(7));
        assert_eq!(parse_whole_number("7.5"), None);
        assert_eq!(parse_whole_number("July"), None);
    }
}
