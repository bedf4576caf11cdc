//! Raw calendar records as handed over by the ingest layer.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::time::{local_to_utc, parse_timezone};

/// A DTSTART/DTEND-like value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordTime {
    /// All-day value.
    Date(NaiveDate),
    Utc(DateTime<Utc>),
    /// Wall-clock time in a named zone (`TZID=...`).
    Zoned { tzid: String, local: NaiveDateTime },
    /// Wall-clock time without zone; interpreted in the local zone.
    Floating(NaiveDateTime),
}

impl RecordTime {
    pub fn is_all_day(&self) -> bool {
        matches!(self, RecordTime::Date(_))
    }

    /// Zone the value is expressed in, with its wall-clock representation.
    ///
    /// Dates are anchored at `all_day_start` in the local zone.
    pub fn wall_clock(&self, local_tz: Tz, all_day_start: chrono::NaiveTime) -> Result<(Tz, NaiveDateTime)> {
        Ok(match self {
            RecordTime::Date(d) => (local_tz, d.and_time(all_day_start)),
            RecordTime::Utc(dt) => (Tz::UTC, dt.naive_utc()),
            RecordTime::Zoned { tzid, local } => (zone_from_tzid(tzid)?, *local),
            RecordTime::Floating(local) => (local_tz, *local),
        })
    }

    /// Absolute instant of a timed value. Dates resolve to local midnight.
    pub fn to_utc(&self, local_tz: Tz) -> Result<DateTime<Utc>> {
        let (tz, local) = self.wall_clock(local_tz, chrono::NaiveTime::MIN)?;
        local_to_utc(&tz, local)
    }
}

/// Calendar clients emit TZIDs like `"Europe/Berlin"` or `/mozilla.org/20050126_1/Europe/Berlin`.
fn zone_from_tzid(tzid: &str) -> Result<Tz> {
    let trimmed = tzid.trim().trim_matches('"');
    if let Ok(tz) = parse_timezone(trimmed) {
        return Ok(tz);
    }

    // Fall back to the trailing Area/City part of vendor-prefixed ids.
    let parts: Vec<&str> = trimmed.rsplitn(3, '/').collect();
    if parts.len() >= 2 {
        let candidate = format!("{}/{}", parts[1], parts[0]);
        if let Ok(tz) = parse_timezone(&candidate) {
            return Ok(tz);
        }
    }

    parse_timezone(trimmed).with_context(|| format!("unknown TZID '{tzid}'"))
}

/// One VEVENT, not yet interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCalendarRecord {
    pub summary: Option<String>,
    pub start: Option<RecordTime>,
    pub end: Option<RecordTime>,
    /// `DURATION`, used when `end` is missing.
    pub duration: Option<Duration>,
    /// Recurrence rule text, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    pub rrule: Option<String>,
    pub exdates: Vec<RecordTime>,
}

impl RawCalendarRecord {
    pub fn new(summary: impl Into<String>, start: RecordTime, end: RecordTime) -> Self {
        Self {
            summary: Some(summary.into()),
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }

    pub fn with_rrule(mut self, rule: impl Into<String>) -> Self {
        self.rrule = Some(rule.into());
        self
    }

    pub fn with_exdate(mut self, exdate: RecordTime) -> Self {
        self.exdates.push(exdate);
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.rrule.as_deref().is_some_and(|r| !r.trim().is_empty())
    }

    pub fn is_all_day(&self) -> bool {
        self.start.as_ref().is_some_and(RecordTime::is_all_day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn berlin() -> Tz {
        "Europe/Berlin".parse().unwrap()
    }

    #[test]
    fn vendor_prefixed_tzid() {
        let t = RecordTime::Zoned {
            tzid: "/mozilla.org/20050126_1/Europe/Berlin".to_string(),
            local: NaiveDate::from_ymd_opt(2016, 1, 4).unwrap().and_hms_opt(9, 0, 0).unwrap(),
        };
        assert_eq!(t.to_utc(Tz::UTC).unwrap(), Utc.with_ymd_and_hms(2016, 1, 4, 8, 0, 0).unwrap());
    }

    #[test]
    fn unknown_tzid_is_an_error() {
        let t = RecordTime::Zoned {
            tzid: "Nowhere Standard Time".to_string(),
            local: NaiveDate::from_ymd_opt(2016, 1, 4).unwrap().and_hms_opt(9, 0, 0).unwrap(),
        };
        assert!(t.to_utc(Tz::UTC).is_err());
    }

    #[test]
    fn floating_uses_local_zone() {
        let t = RecordTime::Floating(NaiveDate::from_ymd_opt(2016, 7, 4).unwrap().and_hms_opt(9, 0, 0).unwrap());
        assert_eq!(t.to_utc(berlin()).unwrap(), Utc.with_ymd_and_hms(2016, 7, 4, 7, 0, 0).unwrap());
    }

    #[test]
    fn dates_anchor_at_all_day_start() {
        let t = RecordTime::Date(NaiveDate::from_ymd_opt(2016, 1, 4).unwrap());
        let (tz, local) = t.wall_clock(berlin(), NaiveTime::from_hms_opt(6, 0, 0).unwrap()).unwrap();
        assert_eq!(tz, berlin());
        assert_eq!(local.to_string(), "2016-01-04 06:00:00");
        assert!(t.is_all_day());
    }
}
