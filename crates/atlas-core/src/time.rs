//! Lightweight UTC date/time utilities (no chrono dependency).
//!
//! Uses Howard Hinnant's civil_from_days / days_from_civil algorithms for
//! conversion between Unix seconds and calendar dates.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::SECONDS_PER_DAY;

/// Current UTC time as Unix seconds.
pub fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Current UTC timestamp in ISO-8601 format.
pub fn now_iso8601() -> String {
    unix_to_iso8601(now_unix_secs())
}

/// Convert Unix seconds to ISO-8601 UTC string.
pub fn unix_to_iso8601(secs: i64) -> String {
    let days = secs.div_euclid(86400);
    let time_of_day = secs.rem_euclid(86400);
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let (y, m, d) = civil_from_days(days);
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}

/// Parse the timestamp shapes the memory daemon writes into Unix seconds.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]`, and RFC-3339 variants with
/// `T`, fractional seconds, `Z`, or `±HH:MM` offsets. Anything else is `None`.
pub fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.len() < 10 || !s.is_char_boundary(10) {
        return None;
    }
    let (date, rest) = s.split_at(10);
    let mut parts = date.split('-');
    let y: i64 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let d: u32 = parts.next()?.parse().ok()?;
    if !(1..=12).contains(&m) || d == 0 || d > days_in_month(y, m) {
        return None;
    }
    let mut secs = days_from_civil(y, m, d) * 86400;

    let rest = rest.trim_start_matches(['T', ' ']);
    if rest.is_empty() {
        return Some(secs);
    }

    // Split the clock from any zone suffix.
    let zone_at = rest.find(['Z', 'z', '+', '-']).unwrap_or(rest.len());
    let (clock, zone) = rest.split_at(zone_at);
    let clock = clock.split('.').next().unwrap_or("");
    let mut fields = clock.split(':');
    let h: i64 = fields.next()?.parse().ok()?;
    let min: i64 = fields.next().map(str::parse::<i64>).transpose().ok()?.unwrap_or(0);
    let sec: i64 = fields.next().map(str::parse::<i64>).transpose().ok()?.unwrap_or(0);
    if h > 23 || min > 59 || sec > 60 {
        return None;
    }
    secs += h * 3600 + min * 60 + sec;

    let offset = match zone.as_bytes().first() {
        Some(b'+') => Some((1, &zone[1..])),
        Some(b'-') => Some((-1, &zone[1..])),
        _ => None,
    };
    if let Some((sign, body)) = offset {
        let body = body.replace(':', "");
        if body.len() < 2 {
            return None;
        }
        let oh: i64 = body.get(0..2)?.parse().ok()?;
        let om: i64 = body.get(2..4).map(str::parse::<i64>).transpose().ok()?.unwrap_or(0);
        secs -= sign * (oh * 3600 + om * 60);
    }

    Some(secs)
}

/// Whole and fractional days elapsed from `ts` until `now`. Negative for future timestamps.
pub fn days_since(ts: i64, now: i64) -> f64 {
    (now - ts) as f64 / SECONDS_PER_DAY
}

fn days_in_month(y: i64, m: u32) -> u32 {
    match m {
        2 if y % 4 == 0 && (y % 100 != 0 || y % 400 == 0) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Howard Hinnant's civil_from_days: Unix epoch days → (year, month, day).
fn civil_from_days(days: i64) -> (i64, u64, u64) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

/// Howard Hinnant's days_from_civil: (year, month, day) → Unix epoch days.
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let m = m as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}
