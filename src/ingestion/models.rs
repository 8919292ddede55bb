//! Wire types of the ingest operation and per-event validation.

use crate::identity::normalize_name;
use crate::listening_store::{Platform, PlayEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Played and track duration assumed when a platform does not report one.
pub const DEFAULT_DURATION_MS: i64 = 180_000;

pub const DEFAULT_REGION: &str = "global";

/// A play as reported by the platform sync client. Required fields are
/// optional here so that a single malformed event is reported on its own
/// instead of failing the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPlayEvent {
    pub platform: Option<String>,
    pub platform_artist_id: Option<String>,
    pub artist_name: Option<String>,
    pub isrc: Option<String>,
    pub platform_track_id: Option<String>,
    pub track_name: Option<String>,
    /// ISO-8601 timestamp.
    pub played_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub track_duration_ms: Option<i64>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    pub events: Vec<RawPlayEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),

    #[error("invalid playedAt timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("invalid {field}: {value}")]
    InvalidDuration { field: &'static str, value: i64 },
}

/// A raw event that passed validation, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub platform: Platform,
    pub platform_artist_id: String,
    pub artist_name: String,
    pub isrc: Option<String>,
    pub platform_track_id: Option<String>,
    pub track_name: Option<String>,
    pub played_at: DateTime<Utc>,
    pub played_duration_ms: i64,
    pub track_duration_ms: i64,
    pub duration_estimated: bool,
    pub region: String,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn positive_duration(field: &'static str, value: Option<i64>) -> Result<Option<i64>, EventValidationError> {
    match value {
        Some(v) if v <= 0 => Err(EventValidationError::InvalidDuration { field, value: v }),
        other => Ok(other),
    }
}

impl RawPlayEvent {
    pub fn validate(&self, default_duration_ms: i64) -> Result<ValidatedEvent, EventValidationError> {
        let platform_artist_id = non_blank(&self.platform_artist_id)
            .ok_or(EventValidationError::MissingField("platformArtistId"))?;
        let artist_name =
            non_blank(&self.artist_name).ok_or(EventValidationError::MissingField("artistName"))?;
        let played_at_raw =
            non_blank(&self.played_at).ok_or(EventValidationError::MissingField("playedAt"))?;
        let platform_raw =
            non_blank(&self.platform).ok_or(EventValidationError::MissingField("platform"))?;

        let platform = platform_raw
            .parse::<Platform>()
            .map_err(|_| EventValidationError::UnknownPlatform(platform_raw.clone()))?;
        let played_at = DateTime::parse_from_rfc3339(&played_at_raw)
            .map_err(|_| EventValidationError::InvalidTimestamp(played_at_raw.clone()))?
            .with_timezone(&Utc);

        let duration_ms = positive_duration("durationMs", self.duration_ms)?;
        let track_duration_ms = positive_duration("trackDurationMs", self.track_duration_ms)?;

        let played_duration_ms = duration_ms.unwrap_or(default_duration_ms);
        let track_duration_ms_value = track_duration_ms
            .or(duration_ms)
            .unwrap_or(default_duration_ms);

        Ok(ValidatedEvent {
            platform,
            platform_artist_id,
            artist_name,
            isrc: non_blank(&self.isrc),
            platform_track_id: non_blank(&self.platform_track_id),
            track_name: non_blank(&self.track_name),
            played_at,
            played_duration_ms,
            track_duration_ms: track_duration_ms_value,
            duration_estimated: duration_ms.is_none() || track_duration_ms.is_none(),
            region: non_blank(&self.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
        })
    }
}

impl ValidatedEvent {
    pub fn into_play_event(self, user_id: &str, unified_artist_id: String) -> PlayEvent {
        let normalized_track_name = self
            .track_name
            .as_deref()
            .map(normalize_name)
            .filter(|n| !n.is_empty());
        PlayEvent {
            user_id: user_id.to_string(),
            unified_artist_id,
            platform: self.platform,
            platform_artist_id: self.platform_artist_id,
            platform_track_id: self.platform_track_id,
            isrc: self.isrc,
            track_name: self.track_name,
            normalized_track_name,
            played_duration_ms: self.played_duration_ms,
            track_duration_ms: self.track_duration_ms,
            duration_estimated: self.duration_estimated,
            played_at: self.played_at,
            region: self.region,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventErrorDetail {
    /// Position of the event in the submitted batch.
    pub index: usize,
    pub platform_artist_id: Option<String>,
    pub message: String,
}

/// Outcome of one ingest call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub success: bool,
    /// Events committed, including those already present.
    pub processed: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub error_details: Vec<EventErrorDetail>,
    pub last_ingested_played_at: Option<DateTime<Utc>>,
    /// True if the batch was stopped early; the unprocessed tail is not counted.
    pub cancelled: bool,
}
