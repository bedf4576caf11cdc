//! maxd-core: temporal core of the heating schedule synchronizer.
//!
//! Calendar records are filtered and expanded into events, events and the
//! static weekly template become schedules, schedules are merged and reduced
//! to their effective form, and effective days become set-point programs.

pub mod builders;
pub mod event;
pub mod program;
pub mod range_filter;
pub mod record;
pub mod recurrence;
pub mod schedule;
pub mod time;

pub use builders::{WeeklyTemplate, build_calendar, build_static};
pub use event::Event;
pub use program::{Segment, WeekProgram, heating_time, to_program, week_program};
pub use range_filter::{AllDaySpan, RangeFilter, Window};
pub use record::{RawCalendarRecord, RecordTime};
pub use recurrence::RecurrenceRule;
pub use schedule::{Interval, Schedule};
pub use time::MINUTES_PER_DAY;
