//! Data models for the listening database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A streaming platform a play event can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Spotify,
    #[serde(alias = "appleMusic", alias = "apple-music")]
    AppleMusic,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Spotify => "spotify",
            Platform::AppleMusic => "apple_music",
        }
    }

    /// Column of `cross_platform_match` holding this platform's artist id.
    pub(crate) fn match_column(&self) -> &'static str {
        match self {
            Platform::Spotify => "spotify_artist_id",
            Platform::AppleMusic => "apple_music_artist_id",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spotify" => Ok(Platform::Spotify),
            "apple_music" | "appleMusic" | "apple-music" => Ok(Platform::AppleMusic),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
}

impl MatchConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchConfidence::High => "high",
            MatchConfidence::Medium => "medium",
            MatchConfidence::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(MatchConfidence::High),
            "medium" => Some(MatchConfidence::Medium),
            "low" => Some(MatchConfidence::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Isrc,
    NameFuzzy,
    TrackName,
    Manual,
    /// Binding recorded when the resolver created a new unified artist.
    Created,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Isrc => "isrc",
            MatchMethod::NameFuzzy => "name_fuzzy",
            MatchMethod::TrackName => "track_name",
            MatchMethod::Manual => "manual",
            MatchMethod::Created => "created",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "isrc" => Some(MatchMethod::Isrc),
            "name_fuzzy" => Some(MatchMethod::NameFuzzy),
            "track_name" => Some(MatchMethod::TrackName),
            "manual" => Some(MatchMethod::Manual),
            "created" => Some(MatchMethod::Created),
            _ => None,
        }
    }
}

/// Platform specific ids bound to a unified artist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformIds {
    pub spotify: Option<String>,
    pub apple_music: Option<String>,
}

impl PlatformIds {
    pub fn for_platform(platform: Platform, id: &str) -> Self {
        let mut ids = PlatformIds::default();
        *ids.slot_mut(platform) = Some(id.to_string());
        ids
    }

    pub fn get(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::Spotify => self.spotify.as_deref(),
            Platform::AppleMusic => self.apple_music.as_deref(),
        }
    }

    fn slot_mut(&mut self, platform: Platform) -> &mut Option<String> {
        match platform {
            Platform::Spotify => &mut self.spotify,
            Platform::AppleMusic => &mut self.apple_music,
        }
    }
}

/// The single cross-platform record every platform artist id resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedArtist {
    pub unified_id: String,
    pub canonical_name: String,
    pub normalized_name: String,
    pub isrc: Option<String>,
    pub platform_ids: PlatformIds,
    pub total_catalog_track_count: Option<u32>,
    pub catalog_updated_at: Option<DateTime<Utc>>,
}

fn first_present<T: Clone>(existing: &Option<T>, incoming: &Option<T>) -> Option<T> {
    existing.clone().or_else(|| incoming.clone())
}

/// Combines two records for the same unified id without ever replacing a
/// present value: every field keeps the existing value and only falls back
/// to the incoming one when the existing field is empty.
pub fn merge_unified_artist(existing: &UnifiedArtist, incoming: &UnifiedArtist) -> UnifiedArtist {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    let canonical_name = non_empty(&existing.canonical_name)
        .or_else(|| non_empty(&incoming.canonical_name))
        .unwrap_or_default();
    let normalized_name = non_empty(&existing.normalized_name)
        .or_else(|| non_empty(&incoming.normalized_name))
        .unwrap_or_default();

    UnifiedArtist {
        unified_id: existing.unified_id.clone(),
        canonical_name,
        normalized_name,
        isrc: first_present(&existing.isrc, &incoming.isrc),
        platform_ids: PlatformIds {
            spotify: first_present(&existing.platform_ids.spotify, &incoming.platform_ids.spotify),
            apple_music: first_present(
                &existing.platform_ids.apple_music,
                &incoming.platform_ids.apple_music,
            ),
        },
        total_catalog_track_count: first_present(
            &existing.total_catalog_track_count,
            &incoming.total_catalog_track_count,
        ),
        catalog_updated_at: first_present(&existing.catalog_updated_at, &incoming.catalog_updated_at),
    }
}

/// Cached resolution of one platform artist id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossPlatformMatch {
    pub spotify_artist_id: Option<String>,
    pub apple_music_artist_id: Option<String>,
    pub unified_artist_id: String,
    pub confidence: MatchConfidence,
    pub method: MatchMethod,
    pub created_at: DateTime<Utc>,
}

/// A single normalized play, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayEvent {
    pub user_id: String,
    pub unified_artist_id: String,
    pub platform: Platform,
    pub platform_artist_id: String,
    pub platform_track_id: Option<String>,
    pub isrc: Option<String>,
    pub track_name: Option<String>,
    pub normalized_track_name: Option<String>,
    pub played_duration_ms: i64,
    pub track_duration_ms: i64,
    /// True when either duration was filled in with the fallback value.
    pub duration_estimated: bool,
    pub played_at: DateTime<Utc>,
    pub region: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventInsertOutcome {
    Inserted,
    Duplicate,
}

/// Aggregate of a user's listening for one artist in one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStats {
    pub user_id: String,
    pub unified_artist_id: String,
    pub region: String,
    pub play_count: i64,
    pub total_ms_played: i64,
    pub unique_track_count: i64,
    pub avg_completion_rate: f64,
    pub album_saves: i64,
    pub track_likes: i64,
    pub playlist_adds: i64,
    pub engagement_score: f64,
    pub listener_score: f64,
    pub last_played_at: Option<DateTime<Utc>>,
    pub score_updated_at: Option<DateTime<Utc>>,
}

pub const ALBUM_SAVE_WEIGHT: i64 = 3;
pub const TRACK_LIKE_WEIGHT: i64 = 1;
pub const PLAYLIST_ADD_WEIGHT: i64 = 2;

impl ListenerStats {
    /// Weighted engagement counter total, the raw input of the engagement index.
    pub fn engagement_raw(&self) -> f64 {
        (ALBUM_SAVE_WEIGHT * self.album_saves
            + TRACK_LIKE_WEIGHT * self.track_likes
            + PLAYLIST_ADD_WEIGHT * self.playlist_adds) as f64
    }
}

/// Counter increments for the engagement part of the stats row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngagementDelta {
    pub album_saves: i64,
    pub track_likes: i64,
    pub playlist_adds: i64,
}

/// Cohort-wide maxima used to normalize the relative score indices.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CohortMaxima {
    pub max_play_count: i64,
    pub max_total_ms: i64,
    pub max_engagement_raw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardCacheEntry {
    pub artist_id: String,
    pub region: String,
    pub user_id: String,
    pub listener_score: f64,
    pub rank: u32,
    pub cached_at: DateTime<Utc>,
    /// Joined from the stats row at read time, used for time-window filtering.
    pub last_played_at: Option<DateTime<Utc>>,
}

/// Tunable weights and thresholds of the listener score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreConfig {
    pub stream_weight: f64,
    pub duration_weight: f64,
    pub completion_weight: f64,
    pub recency_weight: f64,
    pub engagement_weight: f64,
    pub fan_spread_weight: f64,
    pub recency_decay_lambda: f64,
    pub low_completion_threshold: f64,
    pub low_completion_penalty: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            stream_weight: 0.30,
            duration_weight: 0.25,
            completion_weight: 0.15,
            recency_weight: 0.15,
            engagement_weight: 0.10,
            fan_spread_weight: 0.05,
            recency_decay_lambda: 0.05,
            low_completion_threshold: 0.3,
            low_completion_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConnection {
    pub user_id: String,
    pub platform: Platform,
    pub connected_at: DateTime<Utc>,
}

/// Rows removed by an account erasure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureSummary {
    pub play_events: usize,
    pub listener_stats: usize,
    pub leaderboard_entries: usize,
    /// (artist, region) cohorts the user was part of.
    #[serde(skip)]
    pub affected_cohorts: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningStoreStats {
    pub artists: usize,
    pub play_events: usize,
    pub listener_stats: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist(id: &str) -> UnifiedArtist {
        UnifiedArtist {
            unified_id: id.to_string(),
            canonical_name: String::new(),
            normalized_name: String::new(),
            isrc: None,
            platform_ids: PlatformIds::default(),
            total_catalog_track_count: None,
            catalog_updated_at: None,
        }
    }

    #[test]
    fn merge_keeps_existing_values() {
        let mut existing = artist("u1");
        existing.canonical_name = "The Beatles".to_string();
        existing.normalized_name = "beatles".to_string();
        existing.platform_ids.spotify = Some("sp1".to_string());

        let mut incoming = artist("u1");
        incoming.canonical_name = "Beatles".to_string();
        incoming.isrc = Some("GBX1".to_string());
        incoming.platform_ids.spotify = Some("sp-other".to_string());
        incoming.platform_ids.apple_music = Some("am1".to_string());

        let merged = merge_unified_artist(&existing, &incoming);
        assert_eq!(merged.canonical_name, "The Beatles");
        assert_eq!(merged.normalized_name, "beatles");
        assert_eq!(merged.isrc.as_deref(), Some("GBX1"));
        assert_eq!(merged.platform_ids.spotify.as_deref(), Some("sp1"));
        assert_eq!(merged.platform_ids.apple_music.as_deref(), Some("am1"));
    }

    #[test]
    fn merge_never_replaces_with_null() {
        let mut existing = artist("u1");
        existing.isrc = Some("GBX1".to_string());
        existing.total_catalog_track_count = Some(40);

        let merged = merge_unified_artist(&existing, &artist("u1"));
        assert_eq!(merged.isrc.as_deref(), Some("GBX1"));
        assert_eq!(merged.total_catalog_track_count, Some(40));
    }

    #[test]
    fn platform_parses_aliases() {
        assert_eq!("spotify".parse::<Platform>(), Ok(Platform::Spotify));
        assert_eq!("appleMusic".parse::<Platform>(), Ok(Platform::AppleMusic));
        assert_eq!("apple_music".parse::<Platform>(), Ok(Platform::AppleMusic));
        assert!("tidal".parse::<Platform>().is_err());
    }

    #[test]
    fn default_score_weights_sum_to_one() {
        let c = ScoreConfig::default();
        let sum = c.stream_weight
            + c.duration_weight
            + c.completion_weight
            + c.recency_weight
            + c.engagement_weight
            + c.fan_spread_weight;
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
