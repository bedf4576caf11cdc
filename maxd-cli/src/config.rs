use anyhow::{Context, Result, bail};
use chrono::{Duration, NaiveTime};
use chrono_tz::Tz;
use maxd_core::time::{parse_clock_time, parse_timezone};
use maxd_core::{AllDaySpan, WeeklyTemplate};
use maxd_ingest::CalendarSource;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::device::{Room, RoomSelector};
use crate::state::maxd_home;

pub const MAX_PREHEAT_MINUTES: i64 = 180;
pub const DEFAULT_INTERVAL_SECS: u64 = 10;
pub const MIN_TEMPERATURE: f64 = 4.5;
pub const MAX_TEMPERATURE: f64 = 30.5;

const WEEKDAYS: [&str; 7] = ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"];

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub preheat: Duration,
    pub interval: std::time::Duration,
    /// Local zone override; `None` means the host zone.
    pub timezone: Option<Tz>,
    pub all_day: AllDaySpan,
    pub low: f64,
    pub high: f64,
    pub template: WeeklyTemplate,
    pub calendars: Vec<CalendarSource>,
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub timezone: Option<Tz>,
    pub rooms: RoomSelector,
    pub output: Option<PathBuf>,
    pub room: Vec<Room>,
}

// ---- file layout ----

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    general: GeneralSection,
    #[serde(default)]
    temperature: TemperatureSection,
    #[serde(default)]
    schedule: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    calendars: Vec<CalendarSection>,
    #[serde(default)]
    device: DeviceSection,
}

#[derive(Debug, Default, Deserialize)]
struct GeneralSection {
    preheat: Option<MinutesValue>,
    interval: Option<u64>,
    timezone: Option<String>,
    all_day: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemperatureSection {
    #[serde(default = "default_low")]
    low: f64,
    #[serde(default = "default_high")]
    high: f64,
    #[serde(default = "default_min")]
    min: f64,
    #[serde(default = "default_max")]
    max: f64,
}

impl Default for TemperatureSection {
    fn default() -> Self {
        Self {
            low: default_low(),
            high: default_high(),
            min: default_min(),
            max: default_max(),
        }
    }
}

fn default_low() -> f64 {
    17.0
}

fn default_high() -> f64 {
    21.0
}

fn default_min() -> f64 {
    MIN_TEMPERATURE
}

fn default_max() -> f64 {
    MAX_TEMPERATURE
}

#[derive(Debug, Deserialize)]
struct CalendarSection {
    name: String,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeviceSection {
    timezone: Option<String>,
    rooms: Option<String>,
    output: Option<PathBuf>,
    #[serde(default)]
    room: Vec<Room>,
}

/// Minutes as a number (`30`), a numeric string (`"30"`) or `"H:MM"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MinutesValue {
    Minutes(i64),
    Text(String),
}

pub fn parse_minutes(value: &MinutesValue) -> Result<Duration> {
    let minutes = match value {
        MinutesValue::Minutes(m) => *m,
        MinutesValue::Text(s) => {
            let s = s.trim();
            match s.split_once(':') {
                Some((h, m)) => {
                    let h: i64 = h.trim().parse().with_context(|| format!("invalid hours in '{s}'"))?;
                    let m: i64 = m.trim().parse().with_context(|| format!("invalid minutes in '{s}'"))?;
                    if !(0..60).contains(&m) {
                        bail!("minutes out of range in '{s}'");
                    }
                    h * 60 + m
                }
                None => s.parse().with_context(|| format!("invalid minutes '{s}'"))?,
            }
        }
    };
    if minutes < 0 {
        bail!("negative duration: {minutes} minutes");
    }
    Ok(Duration::minutes(minutes))
}

/// `"06:00-08:00"` as a pair of clock times.
pub fn parse_time_range(s: &str) -> Result<(NaiveTime, NaiveTime)> {
    let (from, to) = s
        .split_once('-')
        .with_context(|| format!("expected HH:MM-HH:MM, got '{s}'"))?;
    let from = parse_clock_time(from.trim())?;
    let to = parse_clock_time(to.trim())?;
    if to <= from {
        bail!("time range '{s}' ends before it starts");
    }
    Ok((from, to))
}

fn clamp_temperature(label: &str, value: f64, min: f64, max: f64) -> f64 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        tracing::warn!("{label} temperature {value} outside [{min}, {max}], using {clamped}");
    }
    clamped
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text).context("parse config")?;
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let general = file.general;

        let mut preheat = match &general.preheat {
            Some(v) => parse_minutes(v).context("general.preheat")?,
            None => Duration::zero(),
        };
        if preheat > Duration::minutes(MAX_PREHEAT_MINUTES) {
            tracing::warn!(
                "preheat of {} minutes exceeds {MAX_PREHEAT_MINUTES}, clamping",
                preheat.num_minutes()
            );
            preheat = Duration::minutes(MAX_PREHEAT_MINUTES);
        }

        let interval = general.interval.unwrap_or(DEFAULT_INTERVAL_SECS);
        if interval == 0 {
            bail!("general.interval must be at least one second");
        }

        let timezone = general
            .timezone
            .as_deref()
            .map(parse_timezone)
            .transpose()
            .context("general.timezone")?;

        let all_day = match general.all_day.as_deref() {
            Some(s) => {
                let (start, end) = parse_time_range(s).context("general.all_day")?;
                AllDaySpan { start, end }
            }
            None => AllDaySpan::default(),
        };

        let t = file.temperature;
        for (label, value) in [("low", t.low), ("high", t.high), ("min", t.min), ("max", t.max)] {
            if !value.is_finite() {
                bail!("temperature.{label} must be a finite number, got {value}");
            }
        }
        if t.min > t.max {
            bail!("temperature.min {} is above temperature.max {}", t.min, t.max);
        }
        let low = clamp_temperature("low", t.low, t.min, t.max);
        let high = clamp_temperature("high", t.high, t.min, t.max);

        let mut template = WeeklyTemplate::new();
        for (day, ranges) in &file.schedule {
            let weekday = WEEKDAYS
                .iter()
                .position(|d| d.eq_ignore_ascii_case(day.trim()))
                .with_context(|| format!("schedule: unknown weekday '{day}'"))?;
            for range in ranges {
                let (from, to) = parse_time_range(range).with_context(|| format!("schedule.{day}"))?;
                template.add(weekday as u32, from, to);
            }
        }

        let calendars = file
            .calendars
            .into_iter()
            .filter_map(|c| {
                let Some(url) = c.url.filter(|u| !u.trim().is_empty()) else {
                    tracing::warn!(calendar = %c.name, "calendar has no url, skipping");
                    return None;
                };
                let source = CalendarSource::new(c.name, url);
                Some(match (c.username, c.password) {
                    (Some(user), Some(pass)) => source.with_credentials(user, pass),
                    _ => source,
                })
            })
            .collect();

        let device = DeviceConfig {
            timezone: file
                .device
                .timezone
                .as_deref()
                .map(parse_timezone)
                .transpose()
                .context("device.timezone")?,
            rooms: match file.device.rooms.as_deref() {
                Some(s) => s.parse().context("device.rooms")?,
                None => RoomSelector::All,
            },
            output: file.device.output,
            room: file.device.room,
        };

        Ok(Self {
            preheat,
            interval: std::time::Duration::from_secs(interval),
            timezone,
            all_day,
            low,
            high,
            template,
            calendars,
            device,
        })
    }

    /// Zone local wall-clock values are interpreted in.
    pub fn local_timezone(&self) -> Tz {
        self.timezone.unwrap_or_else(host_timezone)
    }

    /// Zone programs are written in: the device zone if set, else `local_tz`.
    pub fn target_timezone(&self, local_tz: Tz) -> Tz {
        self.device.timezone.unwrap_or(local_tz)
    }
}

/// Host zone from `TZ`, `/etc/timezone` or the `/etc/localtime` link; UTC otherwise.
pub fn host_timezone() -> Tz {
    let from_env = std::env::var("TZ").ok().map(|s| s.trim_start_matches(':').to_string());
    let from_file = || fs::read_to_string("/etc/timezone").ok().map(|s| s.trim().to_string());
    let from_link = || {
        fs::read_link("/etc/localtime").ok().and_then(|p| {
            let p = p.to_string_lossy().into_owned();
            p.split_once("zoneinfo/").map(|(_, name)| name.to_string())
        })
    };

    [from_env, from_file(), from_link()]
        .into_iter()
        .flatten()
        .find_map(|name| parse_timezone(&name).ok())
        .unwrap_or_else(|| {
            tracing::warn!("could not determine the host time zone, using UTC");
            Tz::UTC
        })
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(maxd_home()?.join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Config::parse(&s).with_context(|| format!("load {}", path.display()))
}
