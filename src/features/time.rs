//! Calendar features from the record timestamp

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Timelike};

use crate::table::{Record, Value};

pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// Parse an ISO-8601 timestamp. Offsets (including `Z`) are honoured; naive
/// timestamps are taken as they are.
pub fn parse_timestamp(ts: &str) -> Option<NaiveDateTime> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::<FixedOffset>::parse_from_rfc3339(ts) {
        return Some(dt.naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
}

/// `hour`, `weekday` (Monday = 0) and `is_weekend`; all null when the
/// timestamp is absent or unparsable
pub fn time_features(record: &Record) -> Record {
    let parsed = record
        .get(TIMESTAMP_FIELD)
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    let mut out = Record::new();
    match parsed {
        Some(dt) => {
            let weekday = dt.weekday().num_days_from_monday();
            out.insert("hour".into(), dt.hour().into());
            out.insert("weekday".into(), weekday.into());
            out.insert("is_weekend".into(), (weekday >= 5).into());
        }
        None => {
            for key in ["hour", "weekday", "is_weekend"] {
                out.insert(key.into(), Value::Null);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: &str) -> Record {
        let mut r = Record::new();
        r.insert(TIMESTAMP_FIELD.into(), ts.into());
        r
    }

    #[test]
    fn test_utc_timestamp() {
        // 2024-03-16 is a Saturday
        let f = time_features(&record("2024-03-16T23:15:00Z"));
        assert_eq!(f["hour"], Value::Number(23.0));
        assert_eq!(f["weekday"], Value::Number(5.0));
        assert_eq!(f["is_weekend"], Value::Bool(true));
    }

    #[test]
    fn test_offset_keeps_local_hour() {
        let f = time_features(&record("2024-03-18T08:00:00+02:00"));
        assert_eq!(f["hour"], Value::Number(8.0));
        assert_eq!(f["weekday"], Value::Number(0.0));
        assert_eq!(f["is_weekend"], Value::Bool(false));
    }

    #[test]
    fn test_naive_timestamp() {
        let f = time_features(&record("2024-03-20 14:30:00"));
        assert_eq!(f["hour"], Value::Number(14.0));
        assert_eq!(f["weekday"], Value::Number(2.0));
    }

    #[test]
    fn test_missing_or_invalid() {
        for f in [time_features(&Record::new()), time_features(&record("yesterday"))] {
            assert!(f["hour"].is_null());
            assert!(f["weekday"].is_null());
            assert!(f["is_weekend"].is_null());
        }
    }
}
