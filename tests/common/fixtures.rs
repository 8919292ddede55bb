//! Test fixtures
//!
//! Builders for raw play event payloads as a platform sync client would
//! submit them.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

/// A fully specified play event, `minutes_ago` minutes before now.
pub fn play_event(
    platform: &str,
    platform_artist_id: &str,
    artist_name: &str,
    track_id: &str,
    minutes_ago: i64,
) -> Value {
    play_event_at(
        platform,
        platform_artist_id,
        artist_name,
        track_id,
        Utc::now() - Duration::minutes(minutes_ago),
    )
}

pub fn play_event_at(
    platform: &str,
    platform_artist_id: &str,
    artist_name: &str,
    track_id: &str,
    played_at: DateTime<Utc>,
) -> Value {
    json!({
        "platform": platform,
        "platformArtistId": platform_artist_id,
        "artistName": artist_name,
        "platformTrackId": track_id,
        "trackName": format!("Track {}", track_id),
        "playedAt": played_at.to_rfc3339(),
        "durationMs": 200_000,
        "trackDurationMs": 200_000,
    })
}
