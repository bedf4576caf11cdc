//! iCalendar (RFC 5545) VEVENT reader.
//!
//! Only what the scheduler needs is read: SUMMARY, DTSTART, DTEND, DURATION,
//! RRULE and EXDATE. Everything else, including nested VALARMs, is ignored.
//!
//!   BEGIN:VEVENT
//!   DTSTART;TZID=Europe/Berlin:20160104T190000
//!   DTEND;TZID=Europe/Berlin:20160104T210000
//!   RRULE:FREQ=WEEKLY;BYDAY=MO
//!   SUMMARY:Choir
//!   END:VEVENT

use anyhow::{Context, Result, bail};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use maxd_core::{RawCalendarRecord, RecordTime};
use regex::Regex;

/// A content line split into name, parameters and value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Property {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl Property {
    fn parse(line: &str) -> Option<Property> {
        // The value starts at the first colon outside a quoted parameter value.
        let mut quoted = false;
        let mut split = None;
        for (idx, c) in line.char_indices() {
            match c {
                '"' => quoted = !quoted,
                ':' if !quoted => {
                    split = Some(idx);
                    break;
                }
                _ => {}
            }
        }
        let split = split?;
        let (head, value) = (&line[..split], &line[split + 1..]);

        let mut parts = head.split(';');
        let name = parts.next()?.trim().to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }

        let params = parts
            .filter_map(|p| p.split_once('='))
            .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.trim().trim_matches('"').to_string()))
            .collect();

        Some(Property {
            name,
            params,
            value: value.to_string(),
        })
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Join folded lines (CRLF followed by a space or tab).
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        match (raw.strip_prefix(' ').or_else(|| raw.strip_prefix('\t')), lines.last_mut()) {
            (Some(continuation), Some(last)) => last.push_str(continuation),
            _ => lines.push(raw.to_string()),
        }
    }
    lines
}

fn unescape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

struct ValueParser {
    datetime_re: Regex,
    duration_re: Regex,
}

impl ValueParser {
    fn new() -> Result<Self> {
        Ok(Self {
            datetime_re: Regex::new(r"^(?P<date>\d{8})(?:T(?P<time>\d{6})(?P<utc>Z)?)?$")?,
            duration_re: Regex::new(concat!(
                r"^(?P<sign>[+-])?P",
                r"(?:(?P<weeks>\d+)W)?",
                r"(?:(?P<days>\d+)D)?",
                r"(?:T(?:(?P<hours>\d+)H)?(?:(?P<minutes>\d+)M)?(?:(?P<seconds>\d+)S)?)?$"
            ))?,
        })
    }

    fn time(&self, value: &str, tzid: Option<&str>, date_only: bool) -> Result<RecordTime> {
        let value = value.trim();
        let caps = self
            .datetime_re
            .captures(value)
            .with_context(|| format!("invalid date/time value '{value}'"))?;

        let date = NaiveDate::parse_from_str(&caps["date"], "%Y%m%d")
            .with_context(|| format!("invalid date '{value}'"))?;

        let Some(time) = caps.name("time") else {
            return Ok(RecordTime::Date(date));
        };
        if date_only {
            bail!("VALUE=DATE with a time component: '{value}'");
        }

        let local = NaiveDateTime::parse_from_str(&format!("{}T{}", &caps["date"], time.as_str()), "%Y%m%dT%H%M%S")
            .with_context(|| format!("invalid date-time '{value}'"))?;

        Ok(match (caps.name("utc"), tzid) {
            (Some(_), _) => RecordTime::Utc(local.and_utc()),
            (None, Some(tzid)) => RecordTime::Zoned {
                tzid: tzid.to_string(),
                local,
            },
            (None, None) => RecordTime::Floating(local),
        })
    }

    fn property_time(&self, prop: &Property) -> Result<RecordTime> {
        let date_only = prop.param("VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"));
        self.time(&prop.value, prop.param("TZID"), date_only)
    }

    fn duration(&self, value: &str) -> Result<Duration> {
        let value = value.trim();
        let caps = self
            .duration_re
            .captures(value)
            .with_context(|| format!("invalid duration '{value}'"))?;

        let part = |name: &str| -> Result<i64> {
            caps.name(name)
                .map(|m| m.as_str().parse::<i64>())
                .transpose()
                .with_context(|| format!("invalid duration '{value}'"))
                .map(Option::unwrap_or_default)
        };

        let total = Duration::weeks(part("weeks")?)
            + Duration::days(part("days")?)
            + Duration::hours(part("hours")?)
            + Duration::minutes(part("minutes")?)
            + Duration::seconds(part("seconds")?);

        Ok(match caps.name("sign").map(|m| m.as_str()) {
            Some("-") => -total,
            _ => total,
        })
    }
}

/// Parse calendar text into raw records, one per VEVENT.
///
/// A VEVENT whose DTSTART cannot be read is dropped with a warning; other
/// unreadable properties are ignored.
pub fn parse_ics(text: &str) -> Result<Vec<RawCalendarRecord>> {
    let values = ValueParser::new()?;

    let mut records = Vec::new();
    let mut current: Option<RawCalendarRecord> = None;
    let mut nested = 0usize;
    let mut broken = false;

    for line in unfold(text) {
        let Some(prop) = Property::parse(&line) else {
            continue;
        };

        if current.is_none() {
            if prop.name == "BEGIN" && prop.value.trim().eq_ignore_ascii_case("VEVENT") {
                current = Some(RawCalendarRecord::default());
                nested = 0;
                broken = false;
            }
            continue;
        }
        let Some(record) = current.as_mut() else {
            continue;
        };

        match prop.name.as_str() {
            "BEGIN" => nested += 1,
            "END" if nested > 0 => nested -= 1,
            "END" => {
                if let Some(done) = current.take() {
                    if broken {
                        tracing::warn!(
                            summary = done.summary.as_deref().unwrap_or("<unnamed>"),
                            "dropping VEVENT with unreadable DTSTART"
                        );
                    } else {
                        records.push(done);
                    }
                }
            }
            _ if nested > 0 => {}
            "SUMMARY" => record.summary = Some(unescape_text(&prop.value)),
            "DTSTART" => match values.property_time(&prop) {
                Ok(start) => record.start = Some(start),
                Err(err) => {
                    tracing::warn!("{err:#}");
                    broken = true;
                }
            },
            "DTEND" => match values.property_time(&prop) {
                Ok(end) => record.end = Some(end),
                Err(err) => tracing::warn!("ignoring DTEND: {err:#}"),
            },
            "DURATION" => match values.duration(&prop.value) {
                Ok(duration) => record.duration = Some(duration),
                Err(err) => tracing::warn!("ignoring DURATION: {err:#}"),
            },
            "RRULE" => record.rrule = Some(prop.value.trim().to_string()),
            "EXDATE" => {
                let date_only = prop.param("VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"));
                for value in prop.value.split(',') {
                    match values.time(value, prop.param("TZID"), date_only) {
                        Ok(exdate) => record.exdates.push(exdate),
                        Err(err) => tracing::warn!("ignoring EXDATE: {err:#}"),
                    }
                }
            }
            _ => {}
        }
    }

    if current.is_some() {
        tracing::warn!("calendar ends inside a VEVENT, dropping it");
    }

    Ok(records)
}
