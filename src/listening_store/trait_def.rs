//! ListeningStore trait definition.

use super::models::{
    CohortMaxima, EngagementDelta, ErasureSummary, EventInsertOutcome, LeaderboardCacheEntry,
    ListenerStats, ListeningStoreStats, MatchConfidence, MatchMethod, Platform,
    PlatformConnection, PlayEvent, ScoreConfig, UnifiedArtist,
};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Trait for listening data storage backends.
pub trait ListeningStore: Send + Sync {
    // =========================================================================
    // Identity
    // =========================================================================

    /// Unified id cached for a platform artist id, if any.
    fn get_cached_match(&self, platform: Platform, platform_artist_id: &str)
        -> Result<Option<String>>;

    /// Caches a resolution. Write-once: if the platform id is already cached the
    /// existing binding is kept. Returns the unified id the platform id is bound to
    /// after the call.
    fn cache_match(
        &self,
        platform: Platform,
        platform_artist_id: &str,
        unified_artist_id: &str,
        confidence: MatchConfidence,
        method: MatchMethod,
    ) -> Result<String>;

    fn get_artist(&self, unified_id: &str) -> Result<Option<UnifiedArtist>>;

    fn find_artist_by_isrc(&self, isrc: &str) -> Result<Option<UnifiedArtist>>;

    fn find_artist_by_platform_id(
        &self,
        platform: Platform,
        platform_artist_id: &str,
    ) -> Result<Option<UnifiedArtist>>;

    /// (unified id, normalized name) of every known artist.
    fn list_artist_names(&self) -> Result<Vec<(String, String)>>;

    /// Whether any play event of the artist has the given normalized track name.
    fn artist_has_track(&self, unified_id: &str, normalized_track_name: &str) -> Result<bool>;

    /// Inserts the artist, or merges it into the existing row with the same
    /// unified id keeping every field that is already set. Returns the stored row.
    fn upsert_artist(&self, artist: &UnifiedArtist) -> Result<UnifiedArtist>;

    /// Returns false if the artist does not exist.
    fn set_catalog_track_count(&self, unified_id: &str, count: u32) -> Result<bool>;

    // =========================================================================
    // Ingestion
    // =========================================================================

    fn get_platform_connection(&self, user_id: &str) -> Result<Option<PlatformConnection>>;

    fn set_platform_connection(&self, connection: &PlatformConnection) -> Result<()>;

    /// Appends the event and, only if it was not already present, folds it into
    /// the aggregate stats row. Both happen in one transaction.
    fn record_play_event(&self, event: &PlayEvent) -> Result<EventInsertOutcome>;

    fn get_cursor(&self, user_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Moves the cursor forward to `played_at`; never moves it backwards.
    /// Returns the cursor value after the call.
    fn advance_cursor(&self, user_id: &str, played_at: DateTime<Utc>) -> Result<DateTime<Utc>>;

    /// Returns the stats row after the update, creating it if needed.
    fn add_engagement(
        &self,
        user_id: &str,
        artist_id: &str,
        region: &str,
        delta: &EngagementDelta,
    ) -> Result<ListenerStats>;

    // =========================================================================
    // Scoring
    // =========================================================================

    fn get_stats(&self, user_id: &str, artist_id: &str, region: &str)
        -> Result<Option<ListenerStats>>;

    fn get_cohort_stats(&self, artist_id: &str, region: &str) -> Result<Vec<ListenerStats>>;

    fn get_cohort_maxima(&self, artist_id: &str, region: &str) -> Result<CohortMaxima>;

    fn update_score(
        &self,
        user_id: &str,
        artist_id: &str,
        region: &str,
        listener_score: f64,
        engagement_score: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// (artist, region) pairs with at least one stats row whose score is missing
    /// or older than its latest play.
    fn get_dirty_cohorts(&self) -> Result<Vec<(String, String)>>;

    fn get_all_cohorts(&self) -> Result<Vec<(String, String)>>;

    fn get_score_config(&self) -> Result<ScoreConfig>;

    fn set_score_config(&self, config: &ScoreConfig) -> Result<()>;

    // =========================================================================
    // Leaderboard
    // =========================================================================

    /// Replaces every cached entry of the pair with the current top `capacity`
    /// scores. Returns the number of cached entries.
    fn rebuild_leaderboard(
        &self,
        artist_id: &str,
        region: &str,
        capacity: usize,
        cached_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Cached entries ordered by rank.
    fn get_leaderboard(&self, artist_id: &str, region: &str) -> Result<Vec<LeaderboardCacheEntry>>;

    /// Position the user would have in a full ranking of the cohort, computed
    /// from the stats table with the same ordering the cache uses.
    fn get_live_rank(&self, user_id: &str, artist_id: &str, region: &str) -> Result<Option<u32>>;

    // =========================================================================
    // Accounts
    // =========================================================================

    fn erase_user(&self, user_id: &str) -> Result<ErasureSummary>;

    fn get_store_stats(&self) -> Result<ListeningStoreStats>;
}
