//! Normalized calendar occurrence.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::time::local_to_utc;

/// A single concrete occurrence, always anchored in UTC.
///
/// `start <= end` is not enforced; upstream calendars occasionally get this wrong
/// and consumers decide what to do with such events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Event {
    pub fn new<T: TimeZone>(name: Option<String>, start: DateTime<T>, end: DateTime<T>) -> Self {
        Self {
            name,
            start: start.with_timezone(&Utc),
            end: end.with_timezone(&Utc),
        }
    }

    /// Build from wall-clock times in `tz`.
    pub fn from_local<T: TimeZone>(
        name: Option<String>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        tz: &T,
    ) -> Result<Self> {
        Ok(Self {
            name,
            start: local_to_utc(tz, start)?,
            end: local_to_utc(tz, end)?,
        })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}
