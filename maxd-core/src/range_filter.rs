//! Range filter: turns raw calendar records into the events of a time window.
//!
//! Recurring records are expanded, all-day records are stretched to the
//! configured all-day span in the local zone. A broken record is logged and
//! skipped; it never takes the rest of the calendar down with it.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::record::{RawCalendarRecord, RecordTime};
use crate::recurrence::RecurrenceRule;
use crate::time::{end_of_day_utc, local_to_utc, start_of_day_utc};

/// Local clock times an all-day event is heated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllDaySpan {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for AllDaySpan {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl AllDaySpan {
    /// The span on `date`, localized in `tz`.
    pub fn on(&self, date: NaiveDate, tz: &Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        Ok((
            local_to_utc(tz, date.and_time(self.start))?,
            local_to_utc(tz, date.and_time(self.end))?,
        ))
    }
}

/// Closed window, normalized to whole UTC days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: start_of_day_utc(start),
            end: end_of_day_utc(end),
        }
    }

    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt <= self.end
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RangeFilter {
    local_tz: Tz,
    all_day: AllDaySpan,
}

impl RangeFilter {
    pub fn new(local_tz: Tz) -> Self {
        Self {
            local_tz,
            all_day: AllDaySpan::default(),
        }
    }

    pub fn with_all_day_span(mut self, span: AllDaySpan) -> Self {
        self.all_day = span;
        self
    }

    /// Events of `records` whose start lies in `[window_start, window_end]`
    /// (both widened to whole UTC days). Order is unspecified.
    pub fn filter<I>(
        &self,
        records: I,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> impl Iterator<Item = Event> + use<I>
    where
        I: IntoIterator<Item = RawCalendarRecord>,
    {
        let window = Window::new(window_start, window_end);
        let filter = *self;

        records.into_iter().flat_map(move |record| match filter.expand(&record, &window) {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(
                    summary = record.summary.as_deref().unwrap_or("<unnamed>"),
                    "skipping calendar record: {err:#}"
                );
                Vec::new()
            }
        })
    }

    fn expand(&self, record: &RawCalendarRecord, window: &Window) -> Result<Vec<Event>> {
        let start = record.start.as_ref().context("record has no start")?;

        if record.is_recurring() {
            return self.expand_recurring(record, start, window);
        }

        let (start, end) = match start {
            RecordTime::Date(date) => self.all_day.on(*date, &self.local_tz)?,
            timed => {
                let start = timed.to_utc(self.local_tz)?;
                (start, self.end_of(record, start)?)
            }
        };

        if !window.contains(start) {
            return Ok(Vec::new());
        }

        Ok(vec![Event::new(record.summary.clone(), start, end)])
    }

    fn expand_recurring(&self, record: &RawCalendarRecord, start: &RecordTime, window: &Window) -> Result<Vec<Event>> {
        let all_day = start.is_all_day();
        let (anchor_tz, anchor) = start.wall_clock(self.local_tz, self.all_day.start)?;

        let rule_text = record.rrule.as_deref().unwrap_or_default();
        let rule = RecurrenceRule::parse(rule_text, anchor_tz)?;

        let template = if all_day {
            Duration::zero()
        } else {
            let start = start.to_utc(self.local_tz)?;
            self.end_of(record, start)? - start
        };

        // Widen by a day: the window is UTC, the rule runs on anchor wall-clock time.
        let lower = window.start.with_timezone(&anchor_tz).naive_local() - Duration::days(1);
        let upper = window.end.with_timezone(&anchor_tz).naive_local() + Duration::days(1);

        let mut events = Vec::new();
        for occurrence in rule.occurrences(anchor, lower, upper)? {
            let instant = local_to_utc(&anchor_tz, occurrence)?;

            if rule.until().is_some_and(|until| instant > until) {
                continue;
            }
            if self.is_excluded(record, occurrence, instant, all_day) {
                continue;
            }

            let (start, end) = if all_day {
                self.all_day.on(occurrence.date(), &self.local_tz)?
            } else {
                (instant, instant + template)
            };

            if window.contains(start) {
                events.push(Event::new(record.summary.clone(), start, end));
            }
        }

        Ok(events)
    }

    /// End of a timed record: DTEND, else DTSTART + DURATION, else DTSTART.
    fn end_of(&self, record: &RawCalendarRecord, start: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match (&record.end, record.duration) {
            (Some(end), _) => end.to_utc(self.local_tz),
            (None, Some(duration)) => Ok(start + duration),
            (None, None) => Ok(start),
        }
    }

    fn is_excluded(&self, record: &RawCalendarRecord, occurrence: NaiveDateTime, instant: DateTime<Utc>, all_day: bool) -> bool {
        record.exdates.iter().any(|exdate| match exdate {
            RecordTime::Date(date) => *date == occurrence.date(),
            _ if all_day => false,
            timed => match timed.to_utc(self.local_tz) {
                Ok(excluded) => excluded == instant,
                Err(err) => {
                    tracing::debug!("ignoring unreadable EXDATE: {err:#}");
                    false
                }
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use std::collections::BTreeSet;

    fn berlin() -> Tz {
        "Europe/Berlin".parse().unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    /// Monday 2016-01-04 .. Sunday 2016-01-10
    fn week() -> (DateTime<Utc>, DateTime<Utc>) {
        (utc(2016, 1, 4, 13, 37), utc(2016, 1, 10, 0, 0))
    }

    fn timed(name: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> RawCalendarRecord {
        RawCalendarRecord::new(name, RecordTime::Utc(start), RecordTime::Utc(end))
    }

    #[test]
    fn window_is_normalized_to_whole_days() {
        let (s, e) = week();
        let w = Window::new(s, e);
        assert_eq!(w.start, utc(2016, 1, 4, 0, 0));
        assert!(w.contains(utc(2016, 1, 10, 23, 59)));
        assert!(!w.contains(utc(2016, 1, 11, 0, 0)));
        assert!(!w.contains(utc(2016, 1, 3, 23, 59)));
    }

    #[test]
    fn single_events_inside_and_outside_the_window() {
        let (s, e) = week();
        let records = vec![
            timed("inside", utc(2016, 1, 5, 9, 0), utc(2016, 1, 5, 10, 0)),
            timed("before", utc(2016, 1, 3, 9, 0), utc(2016, 1, 3, 10, 0)),
            timed("after", utc(2016, 1, 11, 9, 0), utc(2016, 1, 11, 10, 0)),
            timed("last day", utc(2016, 1, 10, 22, 0), utc(2016, 1, 10, 23, 0)),
        ];

        let events: Vec<Event> = RangeFilter::new(Tz::UTC).filter(records, s, e).collect();
        let names: Vec<&str> = events.iter().map(|e| e.display_name()).collect();
        assert_eq!(names, vec!["inside", "last day"]);
        assert_eq!(events[0].end, utc(2016, 1, 5, 10, 0));
    }

    #[test]
    fn filtered_events_outlive_the_filter() {
        let (s, e) = week();
        let records = vec![timed("kept", utc(2016, 1, 6, 9, 0), utc(2016, 1, 6, 10, 0))];

        let events = RangeFilter::new(Tz::UTC).filter(records, s, e);
        let names: Vec<String> = events.map(|e| e.display_name().to_string()).collect();
        assert_eq!(names, vec!["kept".to_string()]);
    }

    #[test]
    fn zoned_single_event_is_converted() {
        let (s, e) = week();
        let record = RawCalendarRecord::new(
            "zoned",
            RecordTime::Zoned { tzid: "Europe/Berlin".to_string(), local: at(2016, 1, 5, 9, 0) },
            RecordTime::Zoned { tzid: "Europe/Berlin".to_string(), local: at(2016, 1, 5, 10, 30) },
        );
        let events: Vec<Event> = RangeFilter::new(Tz::UTC).filter(vec![record], s, e).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, utc(2016, 1, 5, 8, 0));
        assert_eq!(events[0].end, utc(2016, 1, 5, 9, 30));
    }

    #[test]
    fn all_day_event_uses_local_span() {
        let (s, e) = week();
        let record = RawCalendarRecord::new(
            "holiday",
            RecordTime::Date(NaiveDate::from_ymd_opt(2016, 1, 6).unwrap()),
            RecordTime::Date(NaiveDate::from_ymd_opt(2016, 1, 7).unwrap()),
        );
        let events: Vec<Event> = RangeFilter::new(berlin()).filter(vec![record], s, e).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, utc(2016, 1, 6, 5, 0));
        assert_eq!(events[0].end, utc(2016, 1, 6, 22, 0));
    }

    #[test]
    fn custom_all_day_span() {
        let (s, e) = week();
        let span = AllDaySpan {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        };
        let record = RawCalendarRecord::new(
            "holiday",
            RecordTime::Date(NaiveDate::from_ymd_opt(2016, 1, 6).unwrap()),
            RecordTime::Date(NaiveDate::from_ymd_opt(2016, 1, 7).unwrap()),
        );
        let events: Vec<Event> = RangeFilter::new(Tz::UTC)
            .with_all_day_span(span)
            .filter(vec![record], s, e)
            .collect();
        assert_eq!(events[0].start, utc(2016, 1, 6, 8, 0));
        assert_eq!(events[0].end, utc(2016, 1, 6, 20, 0));
    }

    #[test]
    fn daily_recurrence_yields_one_event_per_weekday() {
        let (s, e) = week();
        let record = timed("daily", utc(2015, 11, 2, 7, 0), utc(2015, 11, 2, 8, 30)).with_rrule("FREQ=DAILY");

        let events: Vec<Event> = RangeFilter::new(Tz::UTC).filter(vec![record], s, e).collect();
        assert_eq!(events.len(), 7);

        let weekdays: BTreeSet<u32> = events.iter().map(|e| e.start.weekday().num_days_from_monday()).collect();
        assert_eq!(weekdays.len(), 7);
        assert!(events.iter().all(|e| e.duration() == Duration::minutes(90)));
    }

    #[test]
    fn weekly_recurrence_keeps_local_wall_clock_across_dst() {
        // Anchored in winter (CET), evaluated in summer (CEST).
        let record = RawCalendarRecord::new(
            "weekly",
            RecordTime::Zoned { tzid: "Europe/Berlin".to_string(), local: at(2016, 1, 4, 14, 0) },
            RecordTime::Zoned { tzid: "Europe/Berlin".to_string(), local: at(2016, 1, 4, 15, 0) },
        )
        .with_rrule("FREQ=WEEKLY;BYDAY=MO");

        let events: Vec<Event> = RangeFilter::new(Tz::UTC)
            .filter(vec![record], utc(2016, 7, 4, 0, 0), utc(2016, 7, 10, 0, 0))
            .collect();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, utc(2016, 7, 4, 12, 0));
        assert_eq!(events[0].end, utc(2016, 7, 4, 13, 0));
    }

    #[test]
    fn until_bounds_the_expansion() {
        let (s, e) = week();
        let record = timed("until", utc(2015, 12, 28, 7, 0), utc(2015, 12, 28, 8, 0))
            .with_rrule("FREQ=DAILY;UNTIL=20160106T070000Z");

        let events: Vec<Event> = RangeFilter::new(Tz::UTC).filter(vec![record], s, e).collect();
        // Jan 4, 5 and 6 (UNTIL is inclusive)
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.start <= utc(2016, 1, 6, 7, 0)));
    }

    #[test]
    fn floating_until_with_zoned_anchor() {
        let (s, e) = week();
        let record = RawCalendarRecord::new(
            "mixed",
            RecordTime::Zoned { tzid: "Europe/Berlin".to_string(), local: at(2015, 12, 28, 7, 0) },
            RecordTime::Zoned { tzid: "Europe/Berlin".to_string(), local: at(2015, 12, 28, 8, 0) },
        )
        .with_rrule("FREQ=DAILY;UNTIL=20160105T070000");

        let events: Vec<Event> = RangeFilter::new(Tz::UTC).filter(vec![record], s, e).collect();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn exdates_are_skipped() {
        let (s, e) = week();
        let record = timed("daily", utc(2016, 1, 1, 7, 0), utc(2016, 1, 1, 8, 0))
            .with_rrule("FREQ=DAILY")
            .with_exdate(RecordTime::Utc(utc(2016, 1, 5, 7, 0)))
            .with_exdate(RecordTime::Date(NaiveDate::from_ymd_opt(2016, 1, 7).unwrap()));

        let events: Vec<Event> = RangeFilter::new(Tz::UTC).filter(vec![record], s, e).collect();
        assert_eq!(events.len(), 5);
        assert!(!events.iter().any(|e| e.start.day() == 5 || e.start.day() == 7));
    }

    #[test]
    fn all_day_recurrence_recomputes_span_per_occurrence() {
        let (s, e) = week();
        let record = RawCalendarRecord::new(
            "weekend",
            RecordTime::Date(NaiveDate::from_ymd_opt(2015, 12, 5).unwrap()),
            RecordTime::Date(NaiveDate::from_ymd_opt(2015, 12, 6).unwrap()),
        )
        .with_rrule("FREQ=WEEKLY;BYDAY=SA,SU");

        let events: Vec<Event> = RangeFilter::new(berlin()).filter(vec![record], s, e).collect();
        let mut starts: Vec<DateTime<Utc>> = events.iter().map(|e| e.start).collect();
        starts.sort();
        assert_eq!(starts, vec![utc(2016, 1, 9, 5, 0), utc(2016, 1, 10, 5, 0)]);
        assert!(events.iter().all(|e| e.duration() == Duration::hours(17)));
    }

    #[test]
    fn broken_records_do_not_abort_the_rest() {
        let (s, e) = week();
        let records = vec![
            timed("bad rule", utc(2016, 1, 5, 7, 0), utc(2016, 1, 5, 8, 0)).with_rrule("FREQ=SOMETIMES"),
            RawCalendarRecord {
                summary: Some("no start".to_string()),
                ..Default::default()
            },
            RawCalendarRecord::new(
                "bad zone",
                RecordTime::Zoned { tzid: "Atlantis/Capital".to_string(), local: at(2016, 1, 5, 9, 0) },
                RecordTime::Zoned { tzid: "Atlantis/Capital".to_string(), local: at(2016, 1, 5, 10, 0) },
            ),
            timed("good", utc(2016, 1, 5, 9, 0), utc(2016, 1, 5, 10, 0)),
        ];

        let events: Vec<Event> = RangeFilter::new(Tz::UTC).filter(records, s, e).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].display_name(), "good");
    }

    #[test]
    fn missing_end_falls_back_to_duration() {
        let (s, e) = week();
        let record = RawCalendarRecord {
            summary: Some("duration".to_string()),
            start: Some(RecordTime::Utc(utc(2016, 1, 5, 9, 0))),
            duration: Some(Duration::minutes(45)),
            ..Default::default()
        };
        let events: Vec<Event> = RangeFilter::new(Tz::UTC).filter(vec![record], s, e).collect();
        assert_eq!(events[0].end, utc(2016, 1, 5, 9, 45));
    }
}
