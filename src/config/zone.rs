// src/config/zone.rs
//! The zone used for naive timestamps, market hours and rendered times.
//!
//! `local` follows the host zone at every conversion and IANA names go
//! through the tz database, so both track DST transitions while running.

use chrono::{DateTime, Duration, FixedOffset, Local, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Local,
    Fixed(FixedOffset),
    Named(Tz),
}

impl Zone {
    pub fn utc() -> Self {
        Zone::Fixed(Utc.fix())
    }

    /// Wall-clock time of `t` in this zone.
    pub fn wall_clock(&self, t: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Local => t.with_timezone(&Local).naive_local(),
            Zone::Fixed(off) => t.with_timezone(off).naive_local(),
            Zone::Named(tz) => t.with_timezone(tz).naive_local(),
        }
    }

    /// Read a wall-clock time in this zone. Repeated times take the earlier
    /// instant; times inside a DST gap use the offset in force before it.
    pub fn resolve(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Zone::Local => resolve_in(&Local, naive),
            Zone::Fixed(off) => resolve_in(off, naive),
            Zone::Named(tz) => resolve_in(tz, naive),
        }
    }
}

fn resolve_in<Z: TimeZone>(zone: &Z, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => Some(t.with_timezone(&Utc)),
        LocalResult::None => {
            let before = naive.checked_sub_signed(Duration::hours(3))?;
            let offset = zone.from_local_datetime(&before).earliest()?.offset().fix();
            offset
                .from_local_datetime(&naive)
                .single()
                .map(|t| t.with_timezone(&Utc))
        }
    }
}

impl From<FixedOffset> for Zone {
    fn from(off: FixedOffset) -> Self {
        Zone::Fixed(off)
    }
}

impl From<Tz> for Zone {
    fn from(tz: Tz) -> Self {
        Zone::Named(tz)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::Local => f.write_str("local"),
            Zone::Fixed(off) => write!(f, "{off}"),
            Zone::Named(tz) => f.write_str(tz.name()),
        }
    }
}

/// Resolve `runtime.timezone`.
///
/// Accepts `local` (or empty), `UTC`/`Z`, `±HH:MM` / `±HHMM` and IANA names
/// such as `Asia/Shanghai`.
pub fn parse_zone(raw: &str) -> Option<Zone> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("local") {
        return Some(Zone::Local);
    }
    if s.eq_ignore_ascii_case("utc") || s == "Z" {
        return Some(Zone::utc());
    }

    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return s.parse::<Tz>().ok().map(Zone::Named),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).map(Zone::Fixed)
}
