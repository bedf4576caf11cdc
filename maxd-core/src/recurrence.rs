//! RRULE expansion on wall-clock time.
//!
//! Rules are evaluated on naive wall-clock values of the anchor zone (carried
//! through `rrule` as if they were UTC) and only localized afterwards, so a
//! weekly 14:00 event stays at 14:00 across DST changes. `UNTIL` is lifted out
//! of the rule text and applied as an absolute cut-off by the caller.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rrule::{RRule, Unvalidated};

use crate::time::local_to_utc;

/// Upper bound of occurrences produced per record and window.
pub const MAX_OCCURRENCES: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    /// Rule text without `RRULE:` prefix and without `UNTIL`.
    rule: String,
    until: Option<DateTime<Utc>>,
}

impl RecurrenceRule {
    /// Parse `text`; a floating or date-only `UNTIL` is read in `anchor_tz`.
    pub fn parse(text: &str, anchor_tz: Tz) -> Result<Self> {
        let text = text.trim();
        let text = text
            .strip_prefix("RRULE:")
            .or_else(|| text.strip_prefix("rrule:"))
            .unwrap_or(text);

        let mut parts = Vec::new();
        let mut until = None;
        for part in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('=') {
                Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") => {
                    until = Some(parse_until(value, anchor_tz)?);
                }
                _ => parts.push(part),
            }
        }

        if !parts.iter().any(|p| p.to_ascii_uppercase().starts_with("FREQ=")) {
            bail!("recurrence rule without FREQ: '{text}'");
        }

        Ok(Self {
            rule: parts.join(";"),
            until,
        })
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        self.until
    }

    /// Wall-clock occurrences of the rule anchored at `anchor`, limited to `[lower, upper]`.
    ///
    /// Bounds are advisory: callers still filter on absolute instants.
    pub fn occurrences(
        &self,
        anchor: NaiveDateTime,
        lower: NaiveDateTime,
        upper: NaiveDateTime,
    ) -> Result<Vec<NaiveDateTime>> {
        let rule: RRule<Unvalidated> = self
            .rule
            .parse()
            .with_context(|| format!("invalid recurrence rule '{}'", self.rule))?;

        let frame = rrule::Tz::UTC;
        let set = rule
            .build(frame.from_utc_datetime(&anchor))
            .with_context(|| format!("invalid recurrence rule '{}'", self.rule))?;

        let result = set
            .after(frame.from_utc_datetime(&lower))
            .before(frame.from_utc_datetime(&upper))
            .all(MAX_OCCURRENCES);

        if result.limited {
            tracing::debug!(rule = %self.rule, "recurrence expansion hit the occurrence limit");
        }

        Ok(result.dates.into_iter().map(|d| d.naive_utc()).collect())
    }
}

fn parse_until(value: &str, anchor_tz: Tz) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Some(utc) = value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .with_context(|| format!("invalid UNTIL '{value}'"))?;
        return Ok(naive.and_utc());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return local_to_utc(&anchor_tz, naive);
    }

    // Date-only UNTIL includes the whole day.
    let date = NaiveDate::parse_from_str(value, "%Y%m%d").with_context(|| format!("invalid UNTIL '{value}'"))?;
    let last = NaiveTime::from_hms_opt(23, 59, 59).context("invalid end-of-day time")?;
    local_to_utc(&anchor_tz, date.and_time(last))
}
