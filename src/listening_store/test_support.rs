//! Store doubles for unit tests.

use super::models::{
    CohortMaxima, EngagementDelta, ErasureSummary, EventInsertOutcome, LeaderboardCacheEntry,
    ListenerStats, ListeningStoreStats, MatchConfidence, MatchMethod, Platform,
    PlatformConnection, PlayEvent, ScoreConfig, UnifiedArtist,
};
use super::{ListeningStore, SqliteListeningStore};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

/// In-memory store whose match cache lookups always fail. Everything else is
/// served by a working SQLite store.
pub struct BrokenMatchCacheStore {
    pub inner: SqliteListeningStore,
}

impl BrokenMatchCacheStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteListeningStore::in_memory().unwrap(),
        }
    }
}

impl ListeningStore for BrokenMatchCacheStore {
    fn get_cached_match(&self, _platform: Platform, _platform_artist_id: &str) -> Result<Option<String>> {
        bail!("artist_match_cache is unavailable")
    }

    fn cache_match(
        &self,
        platform: Platform,
        platform_artist_id: &str,
        unified_artist_id: &str,
        confidence: MatchConfidence,
        method: MatchMethod,
    ) -> Result<String> {
        self.inner
            .cache_match(platform, platform_artist_id, unified_artist_id, confidence, method)
    }

    fn get_artist(&self, unified_id: &str) -> Result<Option<UnifiedArtist>> {
        self.inner.get_artist(unified_id)
    }

    fn find_artist_by_isrc(&self, isrc: &str) -> Result<Option<UnifiedArtist>> {
        self.inner.find_artist_by_isrc(isrc)
    }

    fn find_artist_by_platform_id(
        &self,
        platform: Platform,
        platform_artist_id: &str,
    ) -> Result<Option<UnifiedArtist>> {
        self.inner.find_artist_by_platform_id(platform, platform_artist_id)
    }

    fn list_artist_names(&self) -> Result<Vec<(String, String)>> {
        self.inner.list_artist_names()
    }

    fn artist_has_track(&self, unified_id: &str, normalized_track_name: &str) -> Result<bool> {
        self.inner.artist_has_track(unified_id, normalized_track_name)
    }

    fn upsert_artist(&self, artist: &UnifiedArtist) -> Result<UnifiedArtist> {
        self.inner.upsert_artist(artist)
    }

    fn set_catalog_track_count(&self, unified_id: &str, count: u32) -> Result<bool> {
        self.inner.set_catalog_track_count(unified_id, count)
    }

    fn get_platform_connection(&self, user_id: &str) -> Result<Option<PlatformConnection>> {
        self.inner.get_platform_connection(user_id)
    }

    fn set_platform_connection(&self, connection: &PlatformConnection) -> Result<()> {
        self.inner.set_platform_connection(connection)
    }

    fn record_play_event(&self, event: &PlayEvent) -> Result<EventInsertOutcome> {
        self.inner.record_play_event(event)
    }

    fn get_cursor(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.inner.get_cursor(user_id)
    }

    fn advance_cursor(&self, user_id: &str, played_at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.inner.advance_cursor(user_id, played_at)
    }

    fn add_engagement(
        &self,
        user_id: &str,
        artist_id: &str,
        region: &str,
        delta: &EngagementDelta,
    ) -> Result<ListenerStats> {
        self.inner.add_engagement(user_id, artist_id, region, delta)
    }

    fn get_stats(&self, user_id: &str, artist_id: &str, region: &str) -> Result<Option<ListenerStats>> {
        self.inner.get_stats(user_id, artist_id, region)
    }

    fn get_cohort_stats(&self, artist_id: &str, region: &str) -> Result<Vec<ListenerStats>> {
        self.inner.get_cohort_stats(artist_id, region)
    }

    fn get_cohort_maxima(&self, artist_id: &str, region: &str) -> Result<CohortMaxima> {
        self.inner.get_cohort_maxima(artist_id, region)
    }

    fn update_score(
        &self,
        user_id: &str,
        artist_id: &str,
        region: &str,
        listener_score: f64,
        engagement_score: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.update_score(
            user_id,
            artist_id,
            region,
            listener_score,
            engagement_score,
            updated_at,
        )
    }

    fn get_dirty_cohorts(&self) -> Result<Vec<(String, String)>> {
        self.inner.get_dirty_cohorts()
    }

    fn get_all_cohorts(&self) -> Result<Vec<(String, String)>> {
        self.inner.get_all_cohorts()
    }

    fn get_score_config(&self) -> Result<ScoreConfig> {
        self.inner.get_score_config()
    }

    fn set_score_config(&self, config: &ScoreConfig) -> Result<()> {
        self.inner.set_score_config(config)
    }

    fn rebuild_leaderboard(
        &self,
        artist_id: &str,
        region: &str,
        capacity: usize,
        cached_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.inner.rebuild_leaderboard(artist_id, region, capacity, cached_at)
    }

    fn get_leaderboard(&self, artist_id: &str, region: &str) -> Result<Vec<LeaderboardCacheEntry>> {
        self.inner.get_leaderboard(artist_id, region)
    }

    fn get_live_rank(&self, user_id: &str, artist_id: &str, region: &str) -> Result<Option<u32>> {
        self.inner.get_live_rank(user_id, artist_id, region)
    }

    fn erase_user(&self, user_id: &str) -> Result<ErasureSummary> {
        self.inner.erase_user(user_id)
    }

    fn get_store_stats(&self) -> Result<ListeningStoreStats> {
        self.inner.get_store_stats()
    }
}
