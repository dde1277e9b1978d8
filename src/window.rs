// src/window.rs
use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveTime, TimeZone};

/// Daily local-time window `[from, to)`. When `from > to` the window wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    from: NaiveTime,
    to: NaiveTime,
}

impl ActiveWindow {
    pub fn new(from: NaiveTime, to: NaiveTime) -> Self {
        Self { from, to }
    }

    /// Parses `HH:MM` bounds.
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        Ok(Self::new(parse_hhmm(from)?, parse_hhmm(to)?))
    }

    /// Builds a window only when both bounds are set; one bound alone is an error.
    pub fn from_bounds(from: Option<&str>, to: Option<&str>) -> Result<Option<Self>> {
        match (from, to) {
            (None, None) => Ok(None),
            (Some(f), Some(t)) => Self::parse(f, t).map(Some),
            _ => Err(anyhow!("window needs both `from` and `to`")),
        }
    }

    pub fn contains_time(&self, t: NaiveTime) -> bool {
        if self.from == self.to {
            return true;
        }
        if self.from < self.to {
            t >= self.from && t < self.to
        } else {
            t >= self.from || t < self.to
        }
    }

    pub fn contains<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.contains_time(at.time())
    }

    pub fn is_open_now(&self) -> bool {
        self.contains(&Local::now())
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| anyhow!("invalid time `{s}` (expected HH:MM): {e}"))
}

/// `true` when there is no window, or `now` falls inside it.
pub fn is_open(window: Option<&ActiveWindow>) -> bool {
    window.map_or(true, ActiveWindow::is_open_now)
}
