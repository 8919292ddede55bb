//! Per-artist leaderboard snapshots.

mod cache;
mod models;

pub use cache::LeaderboardCache;
pub use models::{
    LeaderboardConfig, LeaderboardRow, LeaderboardView, TimeWindow, DEFAULT_CAPACITY,
    DEFAULT_PAGE_SIZE,
};
