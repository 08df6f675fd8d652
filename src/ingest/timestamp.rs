// src/ingest/timestamp.rs
//! Timestamp coercion for loosely typed payloads.
//!
//! Order:
//! 1) an already-parsed time is used as-is
//! 2) numbers are epochs: seconds if <= 1e12, milliseconds above
//! 3) strings: RFC3339, `Y-m-d H:M:S`, `Y-m-d H:M`, `Y-m-d` (naive ones in the
//!    configured zone), then a bare numeric epoch
//!
//! Anything else yields `None`; callers substitute the fetch time.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::config::Zone;

const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

const NAIVE_DATETIME_LAYOUTS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];
const NAIVE_DATE_LAYOUT: &str = "%Y-%m-%d";

/// A raw time value in one of the shapes sources hand us.
#[derive(Debug, Clone, Copy)]
pub enum RawTime<'a> {
    Parsed(DateTime<Utc>),
    Json(&'a Value),
    Text(&'a str),
}

pub fn coerce(raw: RawTime<'_>, zone: &Zone) -> Option<DateTime<Utc>> {
    match raw {
        RawTime::Parsed(t) => Some(t),
        RawTime::Text(s) => parse_text(s, zone),
        RawTime::Json(Value::String(s)) => parse_text(s, zone),
        RawTime::Json(Value::Number(n)) => {
            let epoch = n
                .as_i64()
                .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))?;
            from_epoch(epoch)
        }
        RawTime::Json(_) => None,
    }
}

/// Epoch in seconds or milliseconds, disambiguated by magnitude.
pub fn from_epoch(v: i64) -> Option<DateTime<Utc>> {
    if v > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(v)
    } else {
        DateTime::from_timestamp(v, 0)
    }
}

fn parse_text(s: &str, zone: &Zone) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for layout in NAIVE_DATETIME_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return localize(naive, zone);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, NAIVE_DATE_LAYOUT) {
        return localize(date.and_hms_opt(0, 0, 0)?, zone);
    }
    s.parse::<i64>().ok().and_then(from_epoch)
}

fn localize(naive: NaiveDateTime, zone: &Zone) -> Option<DateTime<Utc>> {
    zone.resolve(naive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc() -> Zone {
        Zone::utc()
    }

    fn shanghai() -> Zone {
        Zone::Named(chrono_tz::Tz::Asia__Shanghai)
    }

    #[test]
    fn seconds_vs_millis() {
        let secs = coerce(RawTime::Json(&json!(1_700_000_000)), &utc()).unwrap();
        let millis = coerce(RawTime::Json(&json!(1_700_000_000_123i64)), &utc()).unwrap();
        assert_eq!(secs.timestamp(), 1_700_000_000);
        assert_eq!(millis.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn boundary_value_is_seconds() {
        let t = coerce(RawTime::Json(&json!(1_000_000_000_000i64)), &utc()).unwrap();
        assert_eq!(t.timestamp(), 1_000_000_000_000);
    }

    #[test]
    fn float_epoch_is_truncated() {
        let t = coerce(RawTime::Json(&json!(1_700_000_000.9)), &utc()).unwrap();
        assert_eq!(t.timestamp(), 1_700_000_000);
    }

    #[test]
    fn rfc3339_keeps_its_own_offset() {
        let zone = shanghai();
        let t = coerce(RawTime::Text("2024-05-01T10:00:00Z"), &zone).unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn naive_layouts_use_zone() {
        let zone = shanghai();
        let full = coerce(RawTime::Text("2024-05-01 10:00:30"), &zone).unwrap();
        let short = coerce(RawTime::Text("2024-05-01 10:00"), &zone).unwrap();
        let date = coerce(RawTime::Text("2024-05-01"), &zone).unwrap();
        assert_eq!(full.to_rfc3339(), "2024-05-01T02:00:30+00:00");
        assert_eq!(short.to_rfc3339(), "2024-05-01T02:00:00+00:00");
        assert_eq!(date.to_rfc3339(), "2024-04-30T16:00:00+00:00");
    }

    #[test]
    fn naive_times_follow_dst_of_named_zone() {
        let ny = Zone::Named(chrono_tz::Tz::America__New_York);
        let winter = coerce(RawTime::Text("2024-03-09 09:30"), &ny).unwrap();
        let summer = coerce(RawTime::Text("2024-03-11 09:30"), &ny).unwrap();
        assert_eq!(winter.to_rfc3339(), "2024-03-09T14:30:00+00:00");
        assert_eq!(summer.to_rfc3339(), "2024-03-11T13:30:00+00:00");
    }

    #[test]
    fn numeric_string_epoch() {
        let t = coerce(RawTime::Json(&json!("1700000000")), &utc()).unwrap();
        assert_eq!(t.timestamp(), 1_700_000_000);
    }

    #[test]
    fn garbage_and_other_kinds_are_none() {
        assert!(coerce(RawTime::Text("yesterday"), &utc()).is_none());
        assert!(coerce(RawTime::Json(&json!(true)), &utc()).is_none());
        assert!(coerce(RawTime::Json(&json!({"a": 1})), &utc()).is_none());
        assert!(coerce(RawTime::Json(&Value::Null), &utc()).is_none());
    }
}
