use super::models::{LeaderboardConfig, LeaderboardRow, LeaderboardView, TimeWindow};
use crate::listening_store::{LeaderboardCacheEntry, ListeningStore};
use crate::server::metrics;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Read-optimized top-N snapshot per (artist, region).
pub struct LeaderboardCache {
    store: Arc<dyn ListeningStore>,
    config: LeaderboardConfig,
}

impl LeaderboardCache {
    pub fn new(store: Arc<dyn ListeningStore>, config: LeaderboardConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LeaderboardConfig {
        &self.config
    }

    /// Replaces the cached snapshot of the pair with the current top scores.
    pub fn refresh(&self, artist_id: &str, region: &str) -> Result<usize> {
        self.refresh_at(artist_id, region, Utc::now())
    }

    pub fn refresh_at(&self, artist_id: &str, region: &str, now: DateTime<Utc>) -> Result<usize> {
        let cached = self
            .store
            .rebuild_leaderboard(artist_id, region, self.config.capacity, now)?;
        metrics::record_leaderboard_refresh(cached);
        debug!(
            "Refreshed leaderboard {}/{} with {} entries",
            artist_id, region, cached
        );
        Ok(cached)
    }

    pub fn get_leaderboard(
        &self,
        artist_id: &str,
        region: &str,
        window: TimeWindow,
        requester: Option<&str>,
    ) -> Result<LeaderboardView> {
        self.get_leaderboard_at(artist_id, region, window, requester, Utc::now())
    }

    /// Top `page_size` entries of the window plus, if it is not among them,
    /// the requester's own row.
    pub fn get_leaderboard_at(
        &self,
        artist_id: &str,
        region: &str,
        window: TimeWindow,
        requester: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LeaderboardView> {
        let cached = self.store.get_leaderboard(artist_id, region)?;
        let cached_at = cached.first().map(|entry| entry.cached_at);
        let ranked = apply_window(cached, window, now);

        let requester_entry = match requester {
            Some(user_id) => {
                if ranked
                    .iter()
                    .take(self.config.page_size)
                    .any(|row| row.user_id == user_id)
                {
                    None
                } else if let Some(row) = ranked.iter().find(|row| row.user_id == user_id) {
                    Some(row.clone())
                } else if window == TimeWindow::AllTime {
                    self.live_row(user_id, artist_id, region)?
                } else {
                    None
                }
            }
            None => None,
        };

        let entries = ranked.into_iter().take(self.config.page_size).collect();
        Ok(LeaderboardView {
            artist_id: artist_id.to_string(),
            region: region.to_string(),
            time_window: window,
            entries,
            requester_entry,
            cached_at,
        })
    }

    /// Row of a user outside the cached snapshot, ranked against the full cohort.
    fn live_row(&self, user_id: &str, artist_id: &str, region: &str) -> Result<Option<LeaderboardRow>> {
        let Some(stats) = self.store.get_stats(user_id, artist_id, region)? else {
            return Ok(None);
        };
        let Some(rank) = self.store.get_live_rank(user_id, artist_id, region)? else {
            return Ok(None);
        };
        Ok(Some(LeaderboardRow {
            rank,
            user_id: user_id.to_string(),
            listener_score: stats.listener_score,
            last_played_at: stats.last_played_at,
        }))
    }
}

/// Drops entries whose last play falls outside the window and re-ranks the
/// rest in cached order.
fn apply_window(
    cached: Vec<LeaderboardCacheEntry>,
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Vec<LeaderboardRow> {
    let cutoff = window.cutoff(now);
    cached
        .into_iter()
        .filter(|entry| match cutoff {
            Some(cutoff) => entry.last_played_at.is_some_and(|at| at >= cutoff),
            None => true,
        })
        .enumerate()
        .map(|(index, entry)| LeaderboardRow {
            rank: match cutoff {
                Some(_) => index as u32 + 1,
                None => entry.rank,
            },
            user_id: entry.user_id,
            listener_score: entry.listener_score,
            last_played_at: entry.last_played_at,
        })
        .collect()
}
