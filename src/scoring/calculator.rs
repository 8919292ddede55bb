use super::breakdown::{compute_breakdown, ScoreBreakdown};
use crate::listening_store::{ListeningStore, ScoreConfig};
use crate::server::metrics;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Invalid score config: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Rejects configs that cannot produce a meaningful score. Weights are not
/// required to sum to 1.
pub fn validate_score_config(config: &ScoreConfig) -> Result<(), ScoreError> {
    let fields = [
        ("streamWeight", config.stream_weight),
        ("durationWeight", config.duration_weight),
        ("completionWeight", config.completion_weight),
        ("recencyWeight", config.recency_weight),
        ("engagementWeight", config.engagement_weight),
        ("fanSpreadWeight", config.fan_spread_weight),
        ("recencyDecayLambda", config.recency_decay_lambda),
        ("lowCompletionThreshold", config.low_completion_threshold),
    ];
    for (name, value) in fields {
        if !value.is_finite() || value < 0.0 {
            return Err(ScoreError::InvalidConfig(format!(
                "{} must be a non-negative number, got {}",
                name, value
            )));
        }
    }
    if !(0.0..=1.0).contains(&config.low_completion_penalty) {
        return Err(ScoreError::InvalidConfig(format!(
            "lowCompletionPenalty must be within [0, 1], got {}",
            config.low_completion_penalty
        )));
    }
    Ok(())
}

/// Result of recalculating every member of one cohort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CohortRecalculation {
    pub scored: usize,
    pub failed: usize,
}

pub struct ScoreCalculator {
    store: Arc<dyn ListeningStore>,
    config: ScoreConfig,
}

impl ScoreCalculator {
    pub fn new(store: Arc<dyn ListeningStore>, config: ScoreConfig) -> Self {
        Self { store, config }
    }

    /// Calculator using the config currently persisted in the store.
    pub fn from_store(store: Arc<dyn ListeningStore>) -> anyhow::Result<Self> {
        let config = store
            .get_score_config()
            .context("Failed to load score config")?;
        Ok(Self::new(store, config))
    }

    pub fn config(&self) -> &ScoreConfig {
        &self.config
    }

    /// Recomputes and persists the score of one (user, artist, region).
    /// Returns 0 when there are no stats for the tuple or the computation
    /// fails.
    pub fn calculate(&self, user_id: &str, artist_id: &str, region: &str) -> f64 {
        self.calculate_at(user_id, artist_id, region, Utc::now())
    }

    pub fn calculate_at(
        &self,
        user_id: &str,
        artist_id: &str,
        region: &str,
        now: DateTime<Utc>,
    ) -> f64 {
        match self.score(user_id, artist_id, region, now) {
            Ok(Some(breakdown)) => breakdown.listener_score,
            Ok(None) => {
                metrics::record_score_computation("no_stats");
                0.0
            }
            Err(e) => {
                warn!(
                    "Score computation failed for user {} artist {} region {}: {:#}",
                    user_id, artist_id, region, e
                );
                metrics::record_score_computation("error");
                0.0
            }
        }
    }

    /// Computes and persists the score, returning every intermediate value.
    pub fn score(
        &self,
        user_id: &str,
        artist_id: &str,
        region: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScoreBreakdown>, ScoreError> {
        let Some(breakdown) = self.breakdown(user_id, artist_id, region, now)? else {
            return Ok(None);
        };
        self.store.update_score(
            user_id,
            artist_id,
            region,
            breakdown.listener_score,
            breakdown.raw.engagement_raw,
            now,
        )?;
        metrics::record_score_computation("ok");
        Ok(Some(breakdown))
    }

    /// Computes the score from current state without persisting it.
    pub fn breakdown(
        &self,
        user_id: &str,
        artist_id: &str,
        region: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScoreBreakdown>, ScoreError> {
        let Some(stats) = self.store.get_stats(user_id, artist_id, region)? else {
            return Ok(None);
        };
        let maxima = self.store.get_cohort_maxima(artist_id, region)?;
        let catalog = self
            .store
            .get_artist(artist_id)?
            .and_then(|artist| artist.total_catalog_track_count);
        Ok(Some(compute_breakdown(
            &stats,
            &maxima,
            catalog,
            &self.config,
            now,
        )))
    }

    /// Recomputes every member of the (artist, region) cohort against maxima
    /// read once up front. A failure on one member is logged and counted.
    pub fn recalculate_cohort(
        &self,
        artist_id: &str,
        region: &str,
        now: DateTime<Utc>,
    ) -> Result<CohortRecalculation, ScoreError> {
        let members = self.store.get_cohort_stats(artist_id, region)?;
        let maxima = self.store.get_cohort_maxima(artist_id, region)?;
        let catalog = self
            .store
            .get_artist(artist_id)?
            .and_then(|artist| artist.total_catalog_track_count);

        let mut result = CohortRecalculation::default();
        for stats in &members {
            let breakdown = compute_breakdown(stats, &maxima, catalog, &self.config, now);
            match self.store.update_score(
                &stats.user_id,
                artist_id,
                region,
                breakdown.listener_score,
                breakdown.raw.engagement_raw,
                now,
            ) {
                Ok(()) => {
                    metrics::record_score_computation("ok");
                    result.scored += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to store score of user {} for artist {} region {}: {:#}",
                        stats.user_id, artist_id, region, e
                    );
                    metrics::record_score_computation("error");
                    result.failed += 1;
                }
            }
        }
        debug!(
            "Recalculated cohort {}/{}: {} scored, {} failed",
            artist_id, region, result.scored, result.failed
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listening_store::{Platform, PlayEvent, SqliteListeningStore, UnifiedArtist};
    use chrono::Duration;

    fn store() -> Arc<SqliteListeningStore> {
        Arc::new(SqliteListeningStore::in_memory().unwrap())
    }

    fn play(store: &SqliteListeningStore, user: &str, n: i64, at: DateTime<Utc>) {
        for i in 0..n {
            store
                .record_play_event(&PlayEvent {
                    user_id: user.to_string(),
                    unified_artist_id: "artist".to_string(),
                    platform: Platform::Spotify,
                    platform_artist_id: "artist".to_string(),
                    platform_track_id: Some(format!("t{}", i % 3)),
                    isrc: None,
                    track_name: None,
                    normalized_track_name: None,
                    played_duration_ms: 150_000,
                    track_duration_ms: 200_000,
                    duration_estimated: false,
                    played_at: at - Duration::minutes(i),
                    region: "global".to_string(),
                })
                .unwrap();
        }
    }

    #[test]
    fn missing_stats_score_zero() {
        let calculator = ScoreCalculator::new(store(), ScoreConfig::default());
        assert_eq!(calculator.calculate("nobody", "artist", "global"), 0.0);
    }

    #[test]
    fn calculate_persists_score() {
        let store = store();
        let now = Utc::now();
        play(&store, "u1", 4, now);
        let calculator = ScoreCalculator::new(store.clone(), ScoreConfig::default());

        let score = calculator.calculate_at("u1", "artist", "global", now);
        assert!(score > 0.0 && score <= 100.0);

        let stats = store.get_stats("u1", "artist", "global").unwrap().unwrap();
        assert_eq!(stats.listener_score, score);
        assert_eq!(stats.score_updated_at.map(|t| t.timestamp_millis()), Some(now.timestamp_millis()));
    }

    #[test]
    fn breakdown_does_not_persist() {
        let store = store();
        let now = Utc::now();
        play(&store, "u1", 2, now);
        let calculator = ScoreCalculator::new(store.clone(), ScoreConfig::default());

        let breakdown = calculator
            .breakdown("u1", "artist", "global", now)
            .unwrap()
            .unwrap();
        assert_eq!(breakdown.indices.stream, 1.0);
        assert!(store
            .get_stats("u1", "artist", "global")
            .unwrap()
            .unwrap()
            .score_updated_at
            .is_none());
    }

    #[test]
    fn new_cohort_max_is_normalized_to_one() {
        let store = store();
        let now = Utc::now();
        play(&store, "u1", 3, now);
        play(&store, "u2", 5, now);
        let calculator = ScoreCalculator::new(store.clone(), ScoreConfig::default());
        calculator.recalculate_cohort("artist", "global", now).unwrap();

        play(&store, "u3", 9, now);
        let result = calculator.recalculate_cohort("artist", "global", now).unwrap();
        assert_eq!(result, CohortRecalculation { scored: 3, failed: 0 });

        for user in ["u1", "u2", "u3"] {
            let b = calculator
                .breakdown(user, "artist", "global", now)
                .unwrap()
                .unwrap();
            assert!(b.indices.stream <= 1.0);
            if user == "u3" {
                assert_eq!(b.indices.stream, 1.0);
            }
        }
        let u3 = store.get_stats("u3", "artist", "global").unwrap().unwrap();
        let u1 = store.get_stats("u1", "artist", "global").unwrap().unwrap();
        assert!(u3.listener_score > u1.listener_score);
    }

    #[test]
    fn fan_spread_uses_catalog_size() {
        let store = store();
        let now = Utc::now();
        play(&store, "u1", 3, now);
        store
            .upsert_artist(&UnifiedArtist {
                unified_id: "artist".to_string(),
                canonical_name: "Artist".to_string(),
                normalized_name: "artist".to_string(),
                isrc: None,
                platform_ids: Default::default(),
                total_catalog_track_count: None,
                catalog_updated_at: None,
            })
            .unwrap();
        store.set_catalog_track_count("artist", 6).unwrap();

        let calculator = ScoreCalculator::new(store.clone(), ScoreConfig::default());
        let b = calculator
            .breakdown("u1", "artist", "global", now)
            .unwrap()
            .unwrap();
        assert_eq!(b.raw.unique_track_count, 3);
        assert_eq!(b.indices.fan_spread, 0.5);
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(validate_score_config(&ScoreConfig::default()).is_ok());

        let mut config = ScoreConfig::default();
        config.recency_weight = -0.1;
        assert!(matches!(
            validate_score_config(&config),
            Err(ScoreError::InvalidConfig(_))
        ));

        let mut config = ScoreConfig::default();
        config.low_completion_penalty = 1.5;
        assert!(validate_score_config(&config).is_err());

        let mut config = ScoreConfig::default();
        config.stream_weight = f64::NAN;
        assert!(validate_score_config(&config).is_err());
    }
}
