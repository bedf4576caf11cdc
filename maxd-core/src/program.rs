//! Conversion of effective intervals into day programs of set-point segments.

use std::collections::BTreeMap;

use chrono::{Duration, TimeZone};
use serde::{Deserialize, Serialize};

use crate::schedule::{Interval, Schedule};
use crate::time::{MINUTES_PER_DAY, minute_of_day};

/// One set-point segment: `temperature` from minute `start` up to minute `end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub temperature: f64,
    pub start: u16,
    pub end: u16,
}

impl Segment {
    pub fn new(temperature: f64, start: u16, end: u16) -> Self {
        Self { temperature, start, end }
    }

    pub fn minutes(&self) -> u16 {
        self.end - self.start
    }
}

/// Day programs for all seven weekdays (0 = Monday).
pub type WeekProgram = BTreeMap<u32, Vec<Segment>>;

/// Gap-free segments covering the whole day, `high` during each interval and
/// `low` elsewhere. `intervals` are expected in the target zone.
///
/// Intervals are placed by their minute of day only, so a weekday holding
/// intervals of two different dates (the week wraps inside the window) still
/// gets all of them; overlaps are folded together.
pub fn to_program<T: TimeZone>(intervals: &[Interval<T>], low: f64, high: f64) -> Vec<Segment> {
    let mut spans: Vec<(u16, u16)> = intervals
        .iter()
        .map(|interval| {
            let end = if interval.end.date_naive() > interval.start.date_naive() {
                MINUTES_PER_DAY
            } else {
                minute_of_day(&interval.end)
            };
            (minute_of_day(&interval.start), end)
        })
        .collect();
    spans.sort_unstable();

    let mut segments: Vec<Segment> = Vec::new();
    let mut cursor: u16 = 0;

    for (start, end) in spans {
        let start = start.max(cursor);
        if end <= start {
            continue;
        }

        if cursor < start {
            push(&mut segments, Segment::new(low, cursor, start));
        }
        push(&mut segments, Segment::new(high, start, end));
        cursor = end;
    }

    if cursor < MINUTES_PER_DAY {
        push(&mut segments, Segment::new(low, cursor, MINUTES_PER_DAY));
    }

    segments
}

/// Append, extending the previous segment when the temperature repeats.
fn push(segments: &mut Vec<Segment>, segment: Segment) {
    match segments.last_mut() {
        Some(last) if last.temperature == segment.temperature && last.end == segment.start => {
            last.end = segment.end;
        }
        _ => segments.push(segment),
    }
}

/// Programs for every weekday; days without intervals stay at `low`.
pub fn week_program<T: TimeZone>(schedule: &Schedule<T>, low: f64, high: f64) -> WeekProgram {
    (0..7)
        .map(|weekday| (weekday, to_program(schedule.day(weekday), low, high)))
        .collect()
}

/// Total heating time of a day program.
pub fn heating_time(segments: &[Segment], high: f64) -> Duration {
    let minutes: i64 = segments
        .iter()
        .filter(|s| s.temperature == high)
        .map(|s| i64::from(s.minutes()))
        .sum();
    Duration::minutes(minutes)
}
