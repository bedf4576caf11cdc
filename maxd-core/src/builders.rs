//! Schedule builders for the static weekly template and for calendar events.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::schedule::{Interval, Schedule};
use crate::time::{last_second_utc, localize, start_of_day_utc, weekday_index};

/// Weekly heating template in local wall-clock time, keyed 0 = Monday .. 6 = Sunday.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyTemplate {
    days: BTreeMap<u32, Vec<(NaiveTime, NaiveTime)>>,
}

impl WeeklyTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, weekday: u32, start: NaiveTime, end: NaiveTime) {
        self.days.entry(weekday).or_default().push((start, end));
    }

    pub fn with(mut self, weekday: u32, start: NaiveTime, end: NaiveTime) -> Self {
        self.add(weekday, start, end);
        self
    }

    pub fn day(&self, weekday: u32) -> &[(NaiveTime, NaiveTime)] {
        self.days.get(&weekday).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.days.values().all(Vec::is_empty)
    }
}

/// Project the weekly template onto the seven days starting at `window_start`.
///
/// Every day is localized on its own, so a DST change within the week moves
/// the UTC instants but never the wall-clock times.
pub fn build_static(
    window_start: DateTime<Utc>,
    template: &WeeklyTemplate,
    preheat: Duration,
    local_tz: Tz,
) -> Schedule {
    let mut schedule = Schedule::new();
    let first = start_of_day_utc(window_start).date_naive();

    for offset in 0..7 {
        let date = first + Duration::days(offset);
        let weekday = date.weekday().num_days_from_monday();

        for (from, to) in template.day(weekday) {
            let (Some(start), Some(end)) = (
                localize(&local_tz, date.and_time(*from)),
                localize(&local_tz, date.and_time(*to)),
            ) else {
                tracing::warn!(%date, %from, %to, "static schedule entry has no local time, skipping");
                continue;
            };

            let start = start.with_timezone(&Utc) - preheat;
            let end = end.with_timezone(&Utc);
            schedule.insert(weekday_index(&start), Interval::new(start, end));
        }
    }

    schedule
}

/// Turn calendar events into heating intervals.
///
/// Pre-heating never reaches into the previous day and an event running past
/// midnight is cut at the end of its start day (UTC).
pub fn build_calendar<I>(events: I, preheat: Duration) -> Schedule
where
    I: IntoIterator<Item = Event>,
{
    let mut schedule = Schedule::new();

    for event in events {
        let mut start = event.start - preheat;
        if start.date_naive() != event.start.date_naive() {
            start = start_of_day_utc(event.start);
        }

        let mut end = event.end;
        if end.date_naive() > start.date_naive() {
            end = last_second_utc(start.date_naive());
        }

        if end <= start {
            tracing::debug!(event = event.display_name(), %start, %end, "ignoring event without extent");
            continue;
        }

        schedule.insert(weekday_index(&start), Interval::new(start, end));
    }

    schedule
}
