//! Rooms and program writers.
//!
//! The controller stores at most [`MAX_SEGMENTS_PER_DAY`] set-point slots per
//! day; a program that needs more is rejected before anything is written.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use chrono_tz::Tz;
use maxd_core::{Segment, WeekProgram};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

pub const MAX_SEGMENTS_PER_DAY: usize = 13;

const WEEKDAY_NAMES: [&str; 7] = ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub rf_address: String,
}

impl Room {
    /// Stand-in room when none is configured.
    pub fn whole_house() -> Self {
        Self {
            id: 0,
            name: "house".to_string(),
            rf_address: String::new(),
        }
    }
}

/// Which rooms receive the program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RoomSelector {
    #[default]
    All,
    Id(u32),
    Name(String),
    Rf(String),
}

impl RoomSelector {
    pub fn matches(&self, room: &Room) -> bool {
        match self {
            RoomSelector::All => true,
            RoomSelector::Id(id) => room.id == *id,
            RoomSelector::Name(name) => room.name.eq_ignore_ascii_case(name),
            RoomSelector::Rf(rf) => room.rf_address.eq_ignore_ascii_case(rf),
        }
    }

    pub fn select<'a>(&self, rooms: &'a [Room]) -> Vec<&'a Room> {
        rooms.iter().filter(|r| self.matches(r)).collect()
    }
}

impl FromStr for RoomSelector {
    type Err = anyhow::Error;

    /// `all`, `id:N`, `name:S` or `rf:HEX`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(RoomSelector::All);
        }
        let (kind, value) = s
            .split_once(':')
            .with_context(|| format!("room selector '{s}' is not all, id:N, name:S or rf:HEX"))?;
        let value = value.trim();
        if value.is_empty() {
            bail!("room selector '{s}' has no value");
        }
        match kind.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(RoomSelector::Id(
                value.parse().with_context(|| format!("invalid room id '{value}'"))?,
            )),
            "name" => Ok(RoomSelector::Name(value.to_string())),
            "rf" => {
                if !value.chars().all(|c| c.is_ascii_hexdigit()) {
                    bail!("invalid rf address '{value}'");
                }
                Ok(RoomSelector::Rf(value.to_string()))
            }
            other => bail!("unknown room selector kind '{other}'"),
        }
    }
}

pub fn weekday_name(weekday: u32) -> &'static str {
    WEEKDAY_NAMES.get(weekday as usize).copied().unwrap_or("unknown")
}

/// Reject programs the controller cannot store.
pub fn check_program(room: &Room, program: &WeekProgram) -> Result<()> {
    for (weekday, segments) in program {
        if segments.len() > MAX_SEGMENTS_PER_DAY {
            bail!(
                "room '{}': {} program has {} segments, the controller holds {MAX_SEGMENTS_PER_DAY}",
                room.name,
                weekday_name(*weekday),
                segments.len()
            );
        }
    }
    Ok(())
}

/// Destination for week programs.
pub trait ProgramWriter {
    fn rooms(&self) -> Result<Vec<Room>>;
    fn write_program(&mut self, room: &Room, program: &WeekProgram) -> Result<()>;
}

impl<W: ProgramWriter + ?Sized> ProgramWriter for Box<W> {
    fn rooms(&self) -> Result<Vec<Room>> {
        (**self).rooms()
    }

    fn write_program(&mut self, room: &Room, program: &WeekProgram) -> Result<()> {
        (**self).write_program(room, program)
    }
}

/// Logs programs instead of writing them.
pub struct LogProgramWriter {
    rooms: Vec<Room>,
}

impl LogProgramWriter {
    pub fn new(rooms: Vec<Room>) -> Self {
        Self { rooms }
    }
}

impl ProgramWriter for LogProgramWriter {
    fn rooms(&self) -> Result<Vec<Room>> {
        Ok(self.rooms.clone())
    }

    fn write_program(&mut self, room: &Room, program: &WeekProgram) -> Result<()> {
        check_program(room, program)?;
        for (weekday, segments) in program {
            tracing::info!(room = %room.name, day = weekday_name(*weekday), "{}", format_segments(segments));
        }
        Ok(())
    }
}

pub fn format_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| {
            format!(
                "{:02}:{:02}-{:02}:{:02} {:.1}",
                s.start / 60,
                s.start % 60,
                s.end / 60,
                s.end % 60,
                s.temperature
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgramDocument {
    updated_at: String,
    timezone: String,
    rooms: Vec<RoomProgram>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoomProgram {
    #[serde(flatten)]
    room: Room,
    program: std::collections::BTreeMap<String, Vec<Segment>>,
}

/// Writes all room programs into one JSON document. The file is replaced
/// atomically (temp file + rename) on every write.
pub struct JsonProgramWriter {
    path: PathBuf,
    timezone: Tz,
    rooms: Vec<Room>,
    written: Vec<RoomProgram>,
}

impl JsonProgramWriter {
    pub fn new(path: PathBuf, timezone: Tz, rooms: Vec<Room>) -> Self {
        Self {
            path,
            timezone,
            rooms,
            written: Vec::new(),
        }
    }

    fn persist(&self) -> Result<()> {
        let doc = ProgramDocument {
            updated_at: Utc::now().to_rfc3339(),
            timezone: self.timezone.name().to_string(),
            rooms: self.written.clone(),
        };
        let json = serde_json::to_string_pretty(&doc)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}

impl ProgramWriter for JsonProgramWriter {
    fn rooms(&self) -> Result<Vec<Room>> {
        Ok(self.rooms.clone())
    }

    fn write_program(&mut self, room: &Room, program: &WeekProgram) -> Result<()> {
        check_program(room, program)?;

        let entry = RoomProgram {
            room: room.clone(),
            program: program
                .iter()
                .map(|(weekday, segments)| (weekday_name(*weekday).to_string(), segments.clone()))
                .collect(),
        };
        match self.written.iter_mut().find(|p| p.room.id == room.id) {
            Some(existing) => *existing = entry,
            None => self.written.push(entry),
        }

        self.persist()?;
        tracing::debug!(room = %room.name, path = %self.path.display(), "program written");
        Ok(())
    }
}
