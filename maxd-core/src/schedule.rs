//! Weekly schedule of heating intervals and its reduction to an effective form.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::time::weekday_index;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval<T: TimeZone = Utc> {
    pub start: DateTime<T>,
    pub end: DateTime<T>,
}

impl<T: TimeZone> Interval<T> {
    pub fn new(start: DateTime<T>, end: DateTime<T>) -> Self {
        Self { start, end }
    }

    /// Strictly wider on both ends.
    fn strictly_contains(&self, other: &Self) -> bool {
        self.start < other.start && self.end > other.end
    }

    /// `other` starts or ends inside `[self.start, self.end]`.
    fn touches(&self, other: &Self) -> bool {
        let inside = |dt: &DateTime<T>| self.start <= *dt && *dt <= self.end;
        inside(&other.start) || inside(&other.end)
    }

    pub fn with_timezone<T2: TimeZone>(&self, tz: &T2) -> Interval<T2> {
        Interval {
            start: self.start.with_timezone(tz),
            end: self.end.with_timezone(tz),
        }
    }
}

/// Weekday (0 = Monday .. 6 = Sunday) to intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule<T: TimeZone = Utc> {
    days: BTreeMap<u32, Vec<Interval<T>>>,
}

impl<T: TimeZone> Default for Schedule<T> {
    fn default() -> Self {
        Self { days: BTreeMap::new() }
    }
}

impl<T: TimeZone> Schedule<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weekdays outside 0..=6 are dropped.
    pub fn from_days(days: BTreeMap<u32, Vec<Interval<T>>>) -> Self {
        Self {
            days: days.into_iter().filter(|(weekday, _)| *weekday < 7).collect(),
        }
    }

    pub fn insert(&mut self, weekday: u32, interval: Interval<T>) {
        debug_assert!(weekday < 7, "weekday out of range: {weekday}");
        self.days.entry(weekday % 7).or_default().push(interval);
    }

    pub fn day(&self, weekday: u32) -> &[Interval<T>] {
        self.days.get(&weekday).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[Interval<T>])> {
        self.days.iter().map(|(weekday, intervals)| (*weekday, intervals.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.days.values().all(Vec::is_empty)
    }

    pub fn interval_count(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }

    /// Per-weekday concatenation of both schedules. Duplicates are kept.
    pub fn merge(a: &Self, b: &Self) -> Self {
        let mut days = a.days.clone();
        for (weekday, intervals) in &b.days {
            days.entry(*weekday).or_default().extend(intervals.iter().cloned());
        }
        Self { days }
    }

    /// Minimal equivalent schedule: no contained, overlapping or touching
    /// intervals within a weekday. Weekdays without intervals are omitted.
    pub fn effective(&self) -> Self {
        let days = self
            .days
            .iter()
            .filter(|(_, intervals)| !intervals.is_empty())
            .map(|(weekday, intervals)| {
                let mut sorted = intervals.clone();
                sort_intervals(&mut sorted);
                let reduced = merge_touching(remove_contained(sorted));
                (*weekday, reduced)
            })
            .collect();

        Self { days }
    }

    /// Same instants, represented in `tz`, keyed by the weekday of each
    /// interval's start in `tz`.
    pub fn as_timezone<T2: TimeZone>(&self, tz: &T2) -> Schedule<T2> {
        let mut out = Schedule::new();
        for intervals in self.days.values() {
            for interval in intervals {
                let zoned = interval.with_timezone(tz);
                out.insert(weekday_index(&zoned.start), zoned);
            }
        }
        for intervals in out.days.values_mut() {
            sort_intervals(intervals);
        }
        out
    }
}

fn sort_intervals<T: TimeZone>(intervals: &mut [Interval<T>]) {
    intervals.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.end.cmp(&b.end)));
}

/// Take candidates front to back; drop one if a remaining or already accepted
/// interval strictly contains it.
fn remove_contained<T: TimeZone>(sorted: Vec<Interval<T>>) -> Vec<Interval<T>> {
    let mut remaining = sorted;
    let mut accepted: Vec<Interval<T>> = Vec::new();

    while !remaining.is_empty() {
        let current = remaining.remove(0);
        let contained = remaining
            .iter()
            .chain(accepted.iter())
            .any(|other| other.strictly_contains(&current));

        if !contained {
            accepted.push(current);
        }
    }

    accepted
}

/// Absorb every interval touching the current one, repeating until the grown
/// interval touches nothing else.
fn merge_touching<T: TimeZone>(sorted: Vec<Interval<T>>) -> Vec<Interval<T>> {
    let mut remaining = sorted;
    let mut accepted: Vec<Interval<T>> = Vec::new();

    while !remaining.is_empty() {
        let mut current = remaining.remove(0);

        loop {
            let (matches, rest): (Vec<_>, Vec<_>) =
                remaining.into_iter().partition(|other| current.touches(other));
            remaining = rest;

            if matches.is_empty() {
                break;
            }

            for other in matches {
                if other.start < current.start {
                    current.start = other.start;
                }
                if other.end > current.end {
                    current.end = other.end;
                }
            }
        }

        accepted.push(current);
    }

    accepted
}
