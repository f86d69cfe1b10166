/// Calendar features ("marks") attached to every time step
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Sampling frequency of a dataset, which decides the mark columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    /// month, day, weekday, hour
    Hourly,
    /// month, day, weekday, hour, quarter-hour of the hour
    Minutely,
}

impl Frequency {
    pub fn num_features(&self) -> usize {
        match self {
            Frequency::Hourly => 4,
            Frequency::Minutely => 5,
        }
    }

    /// Raw integer features for one timestamp, weekday counted from Monday = 0
    pub fn features(&self, ts: &NaiveDateTime) -> Vec<f32> {
        let mut marks = vec![
            ts.month() as f32,
            ts.day() as f32,
            ts.weekday().num_days_from_monday() as f32,
            ts.hour() as f32,
        ];
        if *self == Frequency::Minutely {
            marks.push((ts.minute() / 15) as f32);
        }
        marks
    }
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

/// Parse the date column of a dataset row
pub fn parse_timestamp(raw: &str) -> crate::Result<NaiveDateTime> {
    let raw = raw.trim();
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| crate::ForecastError::Data(format!("unparseable timestamp '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hourly_features() {
        // 2016-07-01 was a Friday
        let ts = parse_timestamp("2016-07-01 13:00:00").unwrap();
        assert_eq!(Frequency::Hourly.features(&ts), vec![7.0, 1.0, 4.0, 13.0]);
    }

    #[test]
    fn test_minute_features() {
        let ts = parse_timestamp("2016-07-04 00:45:00").unwrap();
        let marks = Frequency::Minutely.features(&ts);
        assert_eq!(marks.len(), Frequency::Minutely.num_features());
        assert_eq!(marks, vec![7.0, 4.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2016-07-01 13:00").is_ok());
        assert!(parse_timestamp("2016/07/01 13:00").is_ok());
        assert!(parse_timestamp("2016-07-01").is_ok());
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(crate::ForecastError::Data(_))
        ));
    }
}
