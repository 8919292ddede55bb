//! The listener score formula.
//!
//! Everything here is a pure function of one stats row, the cohort maxima
//! and the config, so a score can always be reproduced from current state.

use crate::listening_store::{CohortMaxima, ListenerStats, ScoreConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Days since last play assumed for a user who never listened.
pub const NEVER_PLAYED_DAYS: f64 = 999.0;

pub const MAX_SCORE: f64 = 100.0;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// One value per score component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSet {
    pub stream: f64,
    pub duration: f64,
    pub completion: f64,
    pub recency: f64,
    pub engagement: f64,
    pub fan_spread: f64,
}

impl IndexSet {
    pub fn weights(config: &ScoreConfig) -> Self {
        Self {
            stream: config.stream_weight,
            duration: config.duration_weight,
            completion: config.completion_weight,
            recency: config.recency_weight,
            engagement: config.engagement_weight,
            fan_spread: config.fan_spread_weight,
        }
    }

    fn zip_with(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self {
            stream: f(self.stream, other.stream),
            duration: f(self.duration, other.duration),
            completion: f(self.completion, other.completion),
            recency: f(self.recency, other.recency),
            engagement: f(self.engagement, other.engagement),
            fan_spread: f(self.fan_spread, other.fan_spread),
        }
    }

    pub fn sum(&self) -> f64 {
        self.stream + self.duration + self.completion + self.recency + self.engagement + self.fan_spread
    }
}

/// Inputs of the formula as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScoreInputs {
    pub play_count: i64,
    pub total_ms_played: i64,
    pub unique_track_count: i64,
    pub avg_completion_rate: f64,
    pub engagement_raw: f64,
    pub last_played_at: Option<DateTime<Utc>>,
    pub days_since_last_play: f64,
    pub total_catalog_track_count: Option<u32>,
    pub cohort_max_play_count: i64,
    pub cohort_max_total_ms: i64,
    pub cohort_max_engagement_raw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub user_id: String,
    pub artist_id: String,
    pub region: String,
    pub raw: RawScoreInputs,
    /// Normalized indices, each in `[0, 1]`.
    pub indices: IndexSet,
    pub weights: IndexSet,
    /// `weight * index * 100` per component.
    pub contributions: IndexSet,
    pub low_completion_penalty_applied: bool,
    pub listener_score: f64,
    pub computed_at: DateTime<Utc>,
}

/// `value / max` capped at 1. An empty cohort maximum yields 0.
fn relative(value: f64, max: f64) -> f64 {
    if max <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / max).clamp(0.0, 1.0)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn days_since(last_played_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last_played_at {
        // Plays reported in the future count as just now.
        Some(played_at) => ((now - played_at).num_milliseconds() as f64 / MILLIS_PER_DAY).max(0.0),
        None => NEVER_PLAYED_DAYS,
    }
}

pub fn compute_breakdown(
    stats: &ListenerStats,
    maxima: &CohortMaxima,
    total_catalog_track_count: Option<u32>,
    config: &ScoreConfig,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let engagement_raw = stats.engagement_raw();
    let days_since_last_play = days_since(stats.last_played_at, now);

    let low_completion_penalty_applied =
        stats.avg_completion_rate < config.low_completion_threshold;
    let mut stream = relative(stats.play_count as f64, maxima.max_play_count as f64);
    if low_completion_penalty_applied {
        stream *= 1.0 - clamp_unit(config.low_completion_penalty);
    }

    let fan_spread = match total_catalog_track_count {
        Some(total) if total > 0 => relative(stats.unique_track_count as f64, total as f64),
        _ => 0.0,
    };

    let indices = IndexSet {
        stream,
        duration: relative(stats.total_ms_played as f64, maxima.max_total_ms as f64),
        completion: clamp_unit(stats.avg_completion_rate),
        recency: clamp_unit((-config.recency_decay_lambda * days_since_last_play).exp()),
        engagement: relative(engagement_raw, maxima.max_engagement_raw),
        fan_spread,
    };
    let weights = IndexSet::weights(config);
    let contributions = indices.zip_with(&weights, |index, weight| index * weight * MAX_SCORE);

    let total = contributions.sum();
    let listener_score = if total.is_finite() {
        total.clamp(0.0, MAX_SCORE)
    } else {
        0.0
    };

    ScoreBreakdown {
        user_id: stats.user_id.clone(),
        artist_id: stats.unified_artist_id.clone(),
        region: stats.region.clone(),
        raw: RawScoreInputs {
            play_count: stats.play_count,
            total_ms_played: stats.total_ms_played,
            unique_track_count: stats.unique_track_count,
            avg_completion_rate: stats.avg_completion_rate,
            engagement_raw,
            last_played_at: stats.last_played_at,
            days_since_last_play,
            total_catalog_track_count,
            cohort_max_play_count: maxima.max_play_count,
            cohort_max_total_ms: maxima.max_total_ms,
            cohort_max_engagement_raw: maxima.max_engagement_raw,
        },
        indices,
        weights,
        contributions,
        low_completion_penalty_applied,
        listener_score,
        computed_at: now,
    }
}
