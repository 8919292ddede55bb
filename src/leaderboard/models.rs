use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderboardConfig {
    /// Entries kept per (artist, region) snapshot.
    pub capacity: usize,
    /// Entries returned per read.
    pub page_size: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeWindow {
    #[default]
    #[serde(rename = "all_time", alias = "allTime")]
    AllTime,
    #[serde(rename = "last_30_days", alias = "last30Days")]
    Last30Days,
    #[serde(rename = "last_7_days", alias = "last7Days")]
    Last7Days,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::AllTime => "all_time",
            TimeWindow::Last30Days => "last_30_days",
            TimeWindow::Last7Days => "last_7_days",
        }
    }

    /// Earliest last play that still counts within the window.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeWindow::AllTime => None,
            TimeWindow::Last30Days => Some(now - Duration::days(30)),
            TimeWindow::Last7Days => Some(now - Duration::days(7)),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_time" | "allTime" => Ok(TimeWindow::AllTime),
            "last_30_days" | "last30Days" => Ok(TimeWindow::Last30Days),
            "last_7_days" | "last7Days" => Ok(TimeWindow::Last7Days),
            other => Err(format!("unknown time window '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub rank: u32,
    pub user_id: String,
    pub listener_score: f64,
    pub last_played_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardView {
    pub artist_id: String,
    pub region: String,
    pub time_window: TimeWindow,
    pub entries: Vec<LeaderboardRow>,
    /// The requester's own row when it is not part of `entries`.
    pub requester_entry: Option<LeaderboardRow>,
    /// When the snapshot was built; None if the pair was never refreshed.
    pub cached_at: Option<DateTime<Utc>>,
}
