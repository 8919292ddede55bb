//! SQLite schema definitions for the listening database.
//!
//! Timestamps are stored as INTEGER unix milliseconds.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const UNIFIED_ARTIST_TABLE: Table = Table {
    name: "unified_artist",
    columns: &[
        sqlite_column!("unified_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("canonical_name", &SqlType::Text, non_null = true),
        sqlite_column!("normalized_name", &SqlType::Text, non_null = true),
        sqlite_column!("isrc", &SqlType::Text),
        sqlite_column!("spotify_id", &SqlType::Text),
        sqlite_column!("apple_music_id", &SqlType::Text),
        sqlite_column!("total_catalog_track_count", &SqlType::Integer),
        sqlite_column!("catalog_updated_at", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_unified_artist_isrc", "isrc"),
        ("idx_unified_artist_spotify", "spotify_id"),
        ("idx_unified_artist_apple_music", "apple_music_id"),
    ],
    unique_constraints: &[],
};

/// Resolution cache. Each platform column is unique so a platform artist id
/// can be bound to at most one unified artist.
const CROSS_PLATFORM_MATCH_TABLE: Table = Table {
    name: "cross_platform_match",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("spotify_artist_id", &SqlType::Text),
        sqlite_column!("apple_music_artist_id", &SqlType::Text),
        sqlite_column!("unified_artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("confidence", &SqlType::Text, non_null = true),
        sqlite_column!("method", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_match_unified", "unified_artist_id")],
    unique_constraints: &[&["spotify_artist_id"], &["apple_music_artist_id"]],
};

const PLAY_EVENT_TABLE: Table = Table {
    name: "play_event",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        // sha256 of the natural content of the event
        sqlite_column!("event_key", &SqlType::Text, non_null = true),
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("unified_artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("platform", &SqlType::Text, non_null = true),
        sqlite_column!("platform_artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("platform_track_id", &SqlType::Text),
        sqlite_column!("isrc", &SqlType::Text),
        sqlite_column!("track_name", &SqlType::Text),
        sqlite_column!("normalized_track_name", &SqlType::Text),
        sqlite_column!("played_duration_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("track_duration_ms", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "duration_estimated",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("played_at", &SqlType::Integer, non_null = true),
        sqlite_column!("region", &SqlType::Text, non_null = true),
    ],
    indices: &[
        (
            "idx_play_event_user_artist_region",
            "user_id, unified_artist_id, region",
        ),
        (
            "idx_play_event_artist_track",
            "unified_artist_id, normalized_track_name",
        ),
    ],
    unique_constraints: &[&["event_key"]],
};

const LISTENER_STATS_TABLE: Table = Table {
    name: "listener_stats",
    columns: &[
        sqlite_column!("user_id", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!(
            "unified_artist_id",
            &SqlType::Text,
            is_primary_key = true,
            non_null = true
        ),
        sqlite_column!("region", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("play_count", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!(
            "total_ms_played",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "unique_track_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "avg_completion_rate",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("album_saves", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("track_likes", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!(
            "playlist_adds",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "engagement_score",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "listener_score",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_played_at", &SqlType::Integer),
        sqlite_column!("score_updated_at", &SqlType::Integer),
        // last time a counter changed, compared with score_updated_at to find stale scores
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[(
        "idx_listener_stats_cohort",
        "unified_artist_id, region, listener_score",
    )],
    unique_constraints: &[],
};

const LEADERBOARD_CACHE_TABLE: Table = Table {
    name: "leaderboard_cache_entry",
    columns: &[
        sqlite_column!("artist_id", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("region", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("user_id", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("listener_score", &SqlType::Real, non_null = true),
        sqlite_column!("rank", &SqlType::Integer, non_null = true),
        sqlite_column!("cached_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_leaderboard_rank", "artist_id, region, rank")],
    unique_constraints: &[],
};

const INGESTION_CURSOR_TABLE: Table = Table {
    name: "ingestion_cursor",
    columns: &[
        sqlite_column!("user_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("last_ingested_played_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// Singleton row, `id` is always 1.
const SCORE_CONFIG_TABLE: Table = Table {
    name: "score_config",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("stream_weight", &SqlType::Real, non_null = true),
        sqlite_column!("duration_weight", &SqlType::Real, non_null = true),
        sqlite_column!("completion_weight", &SqlType::Real, non_null = true),
        sqlite_column!("recency_weight", &SqlType::Real, non_null = true),
        sqlite_column!("engagement_weight", &SqlType::Real, non_null = true),
        sqlite_column!("fan_spread_weight", &SqlType::Real, non_null = true),
        sqlite_column!("recency_decay_lambda", &SqlType::Real, non_null = true),
        sqlite_column!("low_completion_threshold", &SqlType::Real, non_null = true),
        sqlite_column!("low_completion_penalty", &SqlType::Real, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const PLATFORM_CONNECTION_TABLE: Table = Table {
    name: "platform_connection",
    columns: &[
        sqlite_column!("user_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("platform", &SqlType::Text, non_null = true),
        sqlite_column!("connected_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

pub const LISTENING_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        UNIFIED_ARTIST_TABLE,
        CROSS_PLATFORM_MATCH_TABLE,
        PLAY_EVENT_TABLE,
        LISTENER_STATS_TABLE,
        LEADERBOARD_CACHE_TABLE,
        INGESTION_CURSOR_TABLE,
        SCORE_CONFIG_TABLE,
        PLATFORM_CONNECTION_TABLE,
    ],
    migration: None,
}];
