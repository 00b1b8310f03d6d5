//! Reading session logs back
//!
//! Only the first three columns of a log line matter for replay:
//!
//! ```text
//! [23:02:07.155] | IN  | B6 08 33     | CC Ch:7 CC:8 Val:51
//! ```
//!
//! The description column is regenerated from the current mapping table,
//! so a log captured without a table can be replayed with one.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveTime, Timelike};
use tokio::fs;

use crate::midi::{parse_hex, Direction, Event};
use crate::session_log::CONTROLLER_PREFIX;

/// Fastest accepted playback multiplier
pub const MAX_REPLAY_SPEED: f64 = 10.0;

/// Gaps at least this long (after scaling) are skipped instead of waited out
const MAX_REPLAY_DELAY: Duration = Duration::from_secs(10);

/// One event line from a log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Text between the brackets
    pub label: String,
    /// Time of day in milliseconds, when the label is a clock time
    pub timestamp_ms: Option<u64>,
    pub direction: Direction,
    pub event: Event,
}

/// Parse `HH:MM:SS.mmm` into milliseconds since midnight
pub fn parse_clock(label: &str) -> Option<u64> {
    let time = NaiveTime::parse_from_str(label.trim(), "%H:%M:%S%.f").ok()?;
    let ms = u64::from(time.num_seconds_from_midnight()) * 1000
        + u64::from(time.nanosecond() / 1_000_000);
    Some(ms)
}

/// Parse one log line; `None` for headers, blank lines and anything malformed
pub fn parse_line(line: &str) -> Option<LogEntry> {
    let rest = line.strip_prefix('[')?;
    let (label, rest) = rest.split_once(']')?;
    let rest = rest.trim_start().strip_prefix('|')?;

    let mut columns = rest.splitn(3, '|');
    let direction = Direction::parse(columns.next()?)?;
    let hex = columns.next()?;
    // The description column must be present, even if empty
    columns.next()?;

    if !hex.chars().all(|c| c.is_ascii_hexdigit() || c == ' ') {
        return None;
    }
    let event = parse_hex(hex)?;

    Some(LogEntry {
        label: label.to_string(),
        timestamp_ms: parse_clock(label),
        direction,
        event,
    })
}

/// Controller name recorded in a log header
pub fn controller_name(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix(CONTROLLER_PREFIX))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// A parsed session log
#[derive(Debug, Clone, Default)]
pub struct ReplayLog {
    pub controller: Option<String>,
    pub entries: Vec<LogEntry>,
    /// Non-empty lines that were not events (header included)
    pub skipped: usize,
}

impl ReplayLog {
    pub fn parse(text: &str) -> Self {
        let mut log = ReplayLog {
            controller: controller_name(text),
            ..ReplayLog::default()
        };

        for line in text.lines() {
            match parse_line(line) {
                Some(entry) => log.entries.push(entry),
                None if !line.trim().is_empty() => log.skipped += 1,
                None => {}
            }
        }

        log
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read log file: {}", path.display()))?;
        Ok(Self::parse(&text))
    }
}

/// Milliseconds in one day of log clock time
pub const DAY_MS: u64 = 86_400_000;

/// Turns log clock times into a running clock that survives midnight
///
/// A clock time earlier than the previous one starts the next day.
/// Entries without a clock time reuse the last value.
#[derive(Debug, Clone, Default)]
pub struct LogClock {
    last: Option<u64>,
    days: u64,
}

impl LogClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Running milliseconds for an entry's time of day
    pub fn advance(&mut self, timestamp_ms: Option<u64>) -> Option<u64> {
        let Some(clock) = timestamp_ms else {
            return self.last.map(|last| last + self.days * DAY_MS);
        };
        if self.last.is_some_and(|last| clock < last) {
            self.days += 1;
        }
        self.last = Some(clock);
        Some(clock + self.days * DAY_MS)
    }
}

/// Paces replay by the recorded time between events
#[derive(Debug, Clone)]
pub struct Pacer {
    speed: f64,
    last: Option<u64>,
}

impl Pacer {
    /// `speed` 1.0 is realtime, 0 replays instantly
    pub fn new(speed: f64) -> Self {
        Self {
            speed: speed.clamp(0.0, MAX_REPLAY_SPEED),
            last: None,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// How long to wait before delivering an entry stamped `timestamp_ms`
    pub fn delay(&mut self, timestamp_ms: Option<u64>) -> Option<Duration> {
        let current = timestamp_ms?;
        let last = self.last.replace(current);
        if self.speed <= 0.0 {
            return None;
        }

        let elapsed = current.checked_sub(last?)?;
        let delay = Duration::from_millis(elapsed).div_f64(self.speed);
        (!delay.is_zero() && delay < MAX_REPLAY_DELAY).then_some(delay)
    }
}
