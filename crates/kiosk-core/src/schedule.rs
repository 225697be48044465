//! Rotation schedule model: clock windows, weekday masks, rotations.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, Days, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{PaneIndex, SourceId};

/// Minutes in a day; the duration of an all-day window.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

// ─── Clock time ───────────────────────────────────────────────────

/// Wall-clock time of day with minute resolution (`HH:MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn new(hour: u16, minute: u16) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self(hour * 60 + minute))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Minute of day for a timestamp.
    pub fn of(ts: NaiveDateTime) -> Self {
        Self((ts.hour() * 60 + ts.minute()) as u16)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for ClockTime {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidClockTime(s.to_owned());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u16 = h.parse().map_err(|_| invalid())?;
        let minute: u16 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

// ─── Weekday mask ─────────────────────────────────────────────────

/// Set of weekdays an entry applies to. Empty in config means every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DayMask(u8);

impl DayMask {
    pub const ALL: Self = Self(0b0111_1111);

    pub fn from_days(days: impl IntoIterator<Item = Weekday>) -> Self {
        let bits = days
            .into_iter()
            .fold(0u8, |acc, d| acc | 1 << d.num_days_from_monday());
        if bits == 0 { Self::ALL } else { Self(bits) }
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_all(self) -> bool {
        self == Self::ALL
    }

    fn days(self) -> impl Iterator<Item = Weekday> {
        (0u8..7)
            .filter(move |&i| self.0 & (1 << i) != 0)
            .filter_map(|i| Weekday::try_from(i).ok())
    }
}

impl Default for DayMask {
    fn default() -> Self {
        Self::ALL
    }
}

fn parse_weekday(s: &str) -> Result<Weekday, ConfigError> {
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| ConfigError::InvalidWeekday(s.to_owned()))
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

impl Serialize for DayMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names: Vec<&str> = if self.is_all() {
            Vec::new()
        } else {
            self.days().map(weekday_name).collect()
        };
        names.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DayMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        let days = names
            .iter()
            .map(|n| parse_weekday(n))
            .collect::<Result<Vec<_>, _>>()
            .map_err(serde::de::Error::custom)?;
        Ok(Self::from_days(days))
    }
}

// ─── Active window ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActiveWindow {
    AllDay,
    /// `start == end` is treated as all day; `start > end` wraps midnight.
    Span { start: ClockTime, end: ClockTime },
}

impl ActiveWindow {
    pub fn duration_minutes(&self) -> u32 {
        match *self {
            Self::AllDay => MINUTES_PER_DAY,
            Self::Span { start, end } => {
                let (s, e) = (u32::from(start.minutes()), u32::from(end.minutes()));
                if s == e {
                    MINUTES_PER_DAY
                } else if s < e {
                    e - s
                } else {
                    MINUTES_PER_DAY - s + e
                }
            }
        }
    }

    /// If `minute` lies inside the window, how many days ago the containing
    /// occurrence started (0 = today, 1 = yesterday for the after-midnight
    /// part of a wrapping window).
    fn started_days_ago(&self, minute: ClockTime) -> Option<u64> {
        match *self {
            Self::AllDay => Some(0),
            Self::Span { start, end } if start == end => Some(0),
            Self::Span { start, end } if start < end => {
                (start <= minute && minute < end).then_some(0)
            }
            Self::Span { start, end } => {
                if minute >= start {
                    Some(0)
                } else if minute < end {
                    Some(1)
                } else {
                    None
                }
            }
        }
    }

    /// Minutes of day at which the window's activity can flip.
    fn edges(&self) -> Vec<ClockTime> {
        match *self {
            Self::AllDay => Vec::new(),
            Self::Span { start, end } if start == end => Vec::new(),
            Self::Span { start, end } => vec![start, end],
        }
    }
}

impl fmt::Display for ActiveWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllDay => f.write_str("all day"),
            Self::Span { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

// ─── Rotation entries ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEntry", into = "RawEntry")]
pub struct RotationEntry {
    pub pane: PaneIndex,
    pub source: SourceId,
    pub window: ActiveWindow,
    pub days: DayMask,
}

impl RotationEntry {
    /// Whether the entry is active at `now` (local wall-clock time). The
    /// weekday mask applies to the day the occurrence started.
    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        let Some(days_ago) = self.window.started_days_ago(ClockTime::of(now)) else {
            return false;
        };
        let start_day = now
            .date()
            .checked_sub_days(Days::new(days_ago))
            .unwrap_or(now.date());
        self.days.contains(start_day.weekday())
    }

    pub(crate) fn edges(&self) -> Vec<ClockTime> {
        let mut edges = self.window.edges();
        // A weekday mask makes midnight a boundary for all-day windows too.
        if !self.days.is_all() {
            edges.push(ClockTime(0));
        }
        edges
    }
}

/// Config representation of an entry: either `start`/`end` or `all_day`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEntry {
    pane: PaneIndex,
    source: SourceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    all_day: bool,
    #[serde(default)]
    days: DayMask,
}

impl TryFrom<RawEntry> for RotationEntry {
    type Error = ConfigError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        let window = if raw.all_day {
            ActiveWindow::AllDay
        } else {
            match (raw.start, raw.end) {
                (Some(start), Some(end)) => ActiveWindow::Span {
                    start: start.parse()?,
                    end: end.parse()?,
                },
                _ => return Err(ConfigError::MissingWindow),
            }
        };
        Ok(Self {
            pane: raw.pane,
            source: raw.source,
            window,
            days: raw.days,
        })
    }
}

impl From<RotationEntry> for RawEntry {
    fn from(entry: RotationEntry) -> Self {
        let (start, end, all_day) = match entry.window {
            ActiveWindow::AllDay => (None, None, true),
            ActiveWindow::Span { start, end } => {
                (Some(start.to_string()), Some(end.to_string()), false)
            }
        };
        Self {
            pane: entry.pane,
            source: entry.source,
            start,
            end,
            all_day,
            days: entry.days,
        }
    }
}

// ─── Rotation & schedule ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rotation {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub entries: Vec<RotationEntry>,
}

fn enabled_by_default() -> bool {
    true
}

/// Everything the scheduler needs: rotations in configuration order, each
/// pane's static fallback, and the sources that can only occupy one pane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub fallbacks: Vec<Option<SourceId>>,
    pub rotations: Vec<Rotation>,
    pub exclusive: BTreeSet<SourceId>,
}

impl Schedule {
    pub fn new(fallbacks: Vec<Option<SourceId>>, rotations: Vec<Rotation>) -> Self {
        Self {
            fallbacks,
            rotations,
            exclusive: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_exclusive(mut self, sources: impl IntoIterator<Item = SourceId>) -> Self {
        self.exclusive = sources.into_iter().collect();
        self
    }

    pub fn pane_count(&self) -> usize {
        self.fallbacks.len()
    }

    pub fn fallback(&self, pane: PaneIndex) -> Option<&SourceId> {
        self.fallbacks.get(pane).and_then(Option::as_ref)
    }
}
