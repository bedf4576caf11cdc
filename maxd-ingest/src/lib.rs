//! maxd-ingest: calendar retrieval (HTTP or local files) and iCalendar parsing.

pub mod fetch;
pub mod parsers;

pub use fetch::{CalendarSource, Credentials, Fetcher, SourceKind};
pub use parsers::ics::parse_ics;
