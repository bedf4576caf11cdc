//! Time utilities: timezone-aware day boundaries and local wall-clock helpers.

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Minutes in a day; also the end-of-day sentinel of a day program.
pub const MINUTES_PER_DAY: u16 = 1440;

/// Parse an IANA zone name like "Europe/Berlin".
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid timezone: {name}"))
}

/// Attach `tz` to a naive wall-clock time.
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant; times
/// inside a DST gap are shifted forward by an hour.
pub fn localize<T: TimeZone>(tz: &T, local: NaiveDateTime) -> Option<DateTime<T>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
}

/// Like [`localize`] but returns UTC and fails loudly.
pub fn local_to_utc<T: TimeZone>(tz: &T, local: NaiveDateTime) -> Result<DateTime<Utc>> {
    localize(tz, local)
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow::anyhow!("local time {local} does not exist"))
}

pub fn start_of_day_utc(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Last representable instant of `dt`'s UTC day.
pub fn end_of_day_utc(dt: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day_utc(dt) + Duration::days(1) - Duration::nanoseconds(1)
}

/// 23:59:59 of `date` in UTC, the clamp bound for intervals spilling into the next day.
pub fn last_second_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc() + Duration::days(1) - Duration::seconds(1)
}

/// 0 = Monday .. 6 = Sunday, in the zone of `dt`.
pub fn weekday_index<T: TimeZone>(dt: &DateTime<T>) -> u32 {
    dt.weekday().num_days_from_monday()
}

pub fn minute_of_day<T: TimeZone>(dt: &DateTime<T>) -> u16 {
    (dt.hour() * 60 + dt.minute()) as u16
}

/// Parse "HH:MM" (also "H:M"). "24:00" maps to 23:59:59 so it can close a day.
pub fn parse_clock_time(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid time of day '{s}', expected HH:MM"))?;
    let h: u32 = h
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid hour in '{s}': {e}"))?;
    let m: u32 = m
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid minute in '{s}': {e}"))?;

    let (h, m, sec) = if (h, m) == (24, 0) { (23, 59, 59) } else { (h, m, 0) };

    NaiveTime::from_hms_opt(h, m, sec).ok_or_else(|| anyhow::anyhow!("time of day out of range: '{s}'"))
}
