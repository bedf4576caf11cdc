use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use maxd_core::{RangeFilter, RawCalendarRecord, Schedule, WeekProgram, build_calendar, build_static, week_program};
use maxd_ingest::Fetcher;

use crate::config::Config;
use crate::device::{ProgramWriter, Room};

/// Days covered by one evaluation, starting today.
const WINDOW_DAYS: i64 = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub effective: Schedule,
    pub target_tz: Tz,
    pub programs: WeekProgram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied { rooms: usize },
    Unchanged,
}

/// One evaluation cycle at a time; remembers the last effective schedule
/// that reached the device.
pub struct Worker<W> {
    config: Config,
    fetcher: Fetcher,
    writer: W,
    last_applied: Option<Schedule>,
}

impl<W: ProgramWriter> Worker<W> {
    pub fn new(config: Config, writer: W) -> Result<Self> {
        Ok(Self {
            config,
            fetcher: Fetcher::new()?,
            writer,
            last_applied: None,
        })
    }

    /// Fetch, merge and reduce everything relevant for the week starting at `now`.
    pub async fn evaluate(&mut self, now: DateTime<Utc>) -> Result<Evaluation> {
        let local_tz = self.config.local_timezone();
        let window_start = now;
        let window_end = now + Duration::days(WINDOW_DAYS);

        let fallback = build_static(window_start, &self.config.template, self.config.preheat, local_tz);

        let records = self.collect_records().await;
        let filter = RangeFilter::new(local_tz).with_all_day_span(self.config.all_day);
        let calendar = build_calendar(filter.filter(records, window_start, window_end), self.config.preheat);

        let effective = Schedule::merge(&fallback, &calendar).effective();
        let target_tz = self.config.target_timezone(local_tz);
        let programs = week_program(&effective.as_timezone(&target_tz), self.config.low, self.config.high);

        tracing::debug!(
            %local_tz,
            %target_tz,
            static_intervals = fallback.interval_count(),
            calendar_intervals = calendar.interval_count(),
            effective_intervals = effective.interval_count(),
            "schedule evaluated"
        );

        Ok(Evaluation {
            effective,
            target_tz,
            programs,
        })
    }

    /// Evaluate and write to the selected rooms unless nothing changed since
    /// the last successful write.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let evaluation = self.evaluate(now).await?;

        if self.last_applied.as_ref() == Some(&evaluation.effective) {
            tracing::debug!("effective schedule unchanged, nothing to write");
            return Ok(CycleOutcome::Unchanged);
        }

        let rooms = self.selected_rooms()?;
        for room in &rooms {
            self.writer
                .write_program(room, &evaluation.programs)
                .with_context(|| format!("write program for room '{}'", room.name))?;
        }

        tracing::info!(
            rooms = rooms.len(),
            intervals = evaluation.effective.interval_count(),
            "heating programs updated"
        );
        self.last_applied = Some(evaluation.effective);
        Ok(CycleOutcome::Applied { rooms: rooms.len() })
    }

    fn selected_rooms(&self) -> Result<Vec<Room>> {
        let mut available = self.writer.rooms()?;
        if available.is_empty() {
            available.push(Room::whole_house());
        }
        let selected: Vec<Room> = self
            .config
            .device
            .rooms
            .select(&available)
            .into_iter()
            .cloned()
            .collect();
        if selected.is_empty() {
            bail!("no room matches {:?}", self.config.device.rooms);
        }
        Ok(selected)
    }

    /// Records of all calendars; a source that fails is logged and left out.
    async fn collect_records(&mut self) -> Vec<RawCalendarRecord> {
        let mut records = Vec::new();
        for source in &self.config.calendars {
            match self.fetcher.fetch(source).await {
                Ok(mut r) => {
                    tracing::debug!(calendar = %source.name, records = r.len(), "calendar fetched");
                    records.append(&mut r);
                }
                Err(err) => tracing::warn!(calendar = %source.name, "calendar unavailable: {err:#}"),
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use maxd_core::Segment;
    use std::path::PathBuf;

    #[derive(Default)]
    struct RecordingWriter {
        rooms: Vec<Room>,
        writes: Vec<(u32, WeekProgram)>,
        fail: bool,
    }

    impl ProgramWriter for RecordingWriter {
        fn rooms(&self) -> Result<Vec<Room>> {
            Ok(self.rooms.clone())
        }

        fn write_program(&mut self, room: &Room, program: &WeekProgram) -> Result<()> {
            if self.fail {
                bail!("device offline");
            }
            self.writes.push((room.id, program.clone()));
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 1, 4, 9, 41, 0).unwrap()
    }

    fn calendar_file(tag: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("maxd-worker-{tag}-{}.ics", std::process::id()));
        std::fs::write(
            &path,
            "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nSUMMARY:Guests\r\n\
DTSTART;TZID=Europe/Berlin:20160106T180000\r\nDTEND;TZID=Europe/Berlin:20160106T230000\r\n\
END:VEVENT\r\nEND:VCALENDAR\r\n",
        )
        .unwrap();
        path
    }

    fn config(calendar: &PathBuf, rooms: &str) -> Config {
        Config::parse(&format!(
            r#"
[general]
timezone = "Europe/Berlin"
preheat = 30

[temperature]
low = 17.0
high = 21.0

[schedule]
monday = ["06:00-08:00"]

[[calendars]]
name = "missing"
url = "/nonexistent/maxd/missing.ics"

[[calendars]]
name = "family"
url = "{}"

[device]
rooms = "{rooms}"
"#,
            calendar.display()
        ))
        .unwrap()
    }

    fn two_rooms() -> Vec<Room> {
        vec![
            Room {
                id: 1,
                name: "Living room".to_string(),
                rf_address: "0a1b2c".to_string(),
            },
            Room {
                id: 2,
                name: "Office".to_string(),
                rf_address: "0d0e0f".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn broken_source_does_not_stop_the_cycle() {
        let path = calendar_file("eval");
        let mut worker = Worker::new(config(&path, "all"), RecordingWriter::default()).unwrap();

        let evaluation = worker.evaluate(now()).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(evaluation.target_tz, chrono_tz::Europe::Berlin);
        assert_eq!(
            evaluation.programs[&2],
            vec![
                Segment::new(17.0, 0, 1050),
                Segment::new(21.0, 1050, 1380),
                Segment::new(17.0, 1380, 1440),
            ]
        );
        assert_eq!(
            evaluation.programs[&0],
            vec![
                Segment::new(17.0, 0, 330),
                Segment::new(21.0, 330, 480),
                Segment::new(17.0, 480, 1440),
            ]
        );
    }

    #[tokio::test]
    async fn unchanged_schedule_is_written_once() {
        let path = calendar_file("once");
        let writer = RecordingWriter {
            rooms: two_rooms(),
            ..Default::default()
        };
        let mut worker = Worker::new(config(&path, "all"), writer).unwrap();

        assert_eq!(worker.run_cycle(now()).await.unwrap(), CycleOutcome::Applied { rooms: 2 });
        assert_eq!(worker.run_cycle(now()).await.unwrap(), CycleOutcome::Unchanged);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(worker.writer.writes.len(), 2);
    }

    #[tokio::test]
    async fn failed_write_is_retried_next_cycle() {
        let path = calendar_file("retry");
        let writer = RecordingWriter {
            rooms: two_rooms(),
            fail: true,
            ..Default::default()
        };
        let mut worker = Worker::new(config(&path, "name:Office"), writer).unwrap();

        assert!(worker.run_cycle(now()).await.is_err());

        worker.writer.fail = false;
        assert_eq!(worker.run_cycle(now()).await.unwrap(), CycleOutcome::Applied { rooms: 1 });
        std::fs::remove_file(&path).unwrap();

        assert_eq!(worker.writer.writes.len(), 1);
        assert_eq!(worker.writer.writes[0].0, 2);
    }

    #[tokio::test]
    async fn unmatched_selector_is_an_error() {
        let path = calendar_file("nomatch");
        let writer = RecordingWriter {
            rooms: two_rooms(),
            ..Default::default()
        };
        let mut worker = Worker::new(config(&path, "id:7"), writer).unwrap();

        assert!(worker.run_cycle(now()).await.is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn without_configured_rooms_the_house_is_written() {
        let path = calendar_file("house");
        let mut worker = Worker::new(config(&path, "all"), RecordingWriter::default()).unwrap();

        assert_eq!(worker.run_cycle(now()).await.unwrap(), CycleOutcome::Applied { rooms: 1 });
        std::fs::remove_file(&path).unwrap();
        assert_eq!(worker.writer.writes[0].0, 0);
    }
}
