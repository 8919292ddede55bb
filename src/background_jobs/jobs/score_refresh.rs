//! Score refresh job.
//!
//! Recalculates the listener scores of every cohort that received plays or
//! engagement since it was last scored, then rebuilds the leaderboard
//! snapshot of each of those cohorts. A manual run with `{"full": true}`
//! recalculates every cohort, which also lets recency decay for listeners
//! that stopped playing.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::leaderboard::LeaderboardCache;
use crate::scoring::ScoreCalculator;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

pub const SCORE_REFRESH_JOB_ID: &str = "score_refresh";

/// Default interval between runs.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScoreRefreshParams {
    full: bool,
}

pub struct ScoreRefreshJob {
    interval: Duration,
}

impl ScoreRefreshJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    fn run(&self, ctx: &JobContext, full: bool) -> Result<(), JobError> {
        let store = ctx.listening_store.clone();
        let cohorts = if full {
            store.get_all_cohorts()
        } else {
            store.get_dirty_cohorts()
        }
        .map_err(|e| JobError::ExecutionFailed(format!("Failed to list cohorts: {:#}", e)))?;

        if cohorts.is_empty() {
            info!("No cohorts to refresh");
            return Ok(());
        }

        let calculator = ScoreCalculator::from_store(store.clone())
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;
        let leaderboard = LeaderboardCache::new(store, ctx.leaderboard_config);

        info!("Refreshing {} cohorts (full: {})", cohorts.len(), full);

        let mut refreshed = 0;
        let mut failed = 0;
        for (artist_id, region) in &cohorts {
            if ctx.is_cancelled() {
                info!(
                    "Score refresh cancelled after {} of {} cohorts",
                    refreshed,
                    cohorts.len()
                );
                return Err(JobError::Cancelled);
            }

            let now = Utc::now();
            let result = calculator
                .recalculate_cohort(artist_id, region, now)
                .map_err(anyhow::Error::from)
                .and_then(|_| leaderboard.refresh_at(artist_id, region, now));
            match result {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    warn!(
                        "Failed to refresh cohort {}/{}: {:#}",
                        artist_id, region, e
                    );
                    failed += 1;
                }
            }
        }

        info!(
            "Score refresh finished: {} cohorts refreshed, {} failed",
            refreshed, failed
        );
        if failed > 0 {
            return Err(JobError::ExecutionFailed(format!(
                "{} of {} cohorts failed to refresh",
                failed,
                cohorts.len()
            )));
        }
        Ok(())
    }
}

impl Default for ScoreRefreshJob {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl BackgroundJob for ScoreRefreshJob {
    fn id(&self) -> &'static str {
        SCORE_REFRESH_JOB_ID
    }

    fn name(&self) -> &'static str {
        "Score Refresh"
    }

    fn description(&self) -> &'static str {
        "Recalculate listener scores of changed cohorts and rebuild their leaderboards"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        self.run(ctx, false)
    }

    fn execute_with_params(
        &self,
        ctx: &JobContext,
        params: Option<JsonValue>,
    ) -> Result<(), JobError> {
        let params: ScoreRefreshParams = match params {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| JobError::ExecutionFailed(format!("Invalid parameters: {}", e)))?,
            None => ScoreRefreshParams::default(),
        };
        self.run(ctx, params.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaderboard::LeaderboardConfig;
    use crate::listening_store::{
        ListeningStore, Platform, PlayEvent, SqliteListeningStore,
    };
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn play(store: &SqliteListeningStore, user: &str, artist: &str, n: i64) {
        for i in 0..n {
            store
                .record_play_event(&PlayEvent {
                    user_id: user.to_string(),
                    unified_artist_id: artist.to_string(),
                    platform: Platform::Spotify,
                    platform_artist_id: artist.to_string(),
                    platform_track_id: Some(format!("t{}", i)),
                    isrc: None,
                    track_name: None,
                    normalized_track_name: None,
                    played_duration_ms: 200_000,
                    track_duration_ms: 200_000,
                    duration_estimated: false,
                    played_at: Utc::now() - chrono::Duration::minutes(i),
                    region: "global".to_string(),
                })
                .unwrap();
        }
    }

    fn context(store: Arc<SqliteListeningStore>) -> JobContext {
        JobContext::new(CancellationToken::new(), store, LeaderboardConfig::default())
    }

    #[test]
    fn refreshes_dirty_cohorts() {
        let store = Arc::new(SqliteListeningStore::in_memory().unwrap());
        play(&store, "u1", "artist", 5);
        play(&store, "u2", "artist", 2);
        play(&store, "u1", "other", 1);
        assert_eq!(store.get_dirty_cohorts().unwrap().len(), 2);

        ScoreRefreshJob::default()
            .execute(&context(store.clone()))
            .unwrap();

        assert!(store.get_dirty_cohorts().unwrap().is_empty());
        let board = store.get_leaderboard("artist", "global").unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user_id, "u1");
        assert!(board[0].listener_score > board[1].listener_score);
        assert_eq!(store.get_leaderboard("other", "global").unwrap().len(), 1);
    }

    #[test]
    fn full_run_rescores_clean_cohorts() {
        let store = Arc::new(SqliteListeningStore::in_memory().unwrap());
        play(&store, "u1", "artist", 1);
        let job = ScoreRefreshJob::default();
        let ctx = context(store.clone());
        job.execute(&ctx).unwrap();
        let first = store
            .get_stats("u1", "artist", "global")
            .unwrap()
            .unwrap()
            .score_updated_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        job.execute_with_params(&ctx, Some(serde_json::json!({ "full": true })))
            .unwrap();
        let second = store
            .get_stats("u1", "artist", "global")
            .unwrap()
            .unwrap()
            .score_updated_at;
        assert!(second > first);
    }

    #[test]
    fn stops_when_cancelled() {
        let store = Arc::new(SqliteListeningStore::in_memory().unwrap());
        play(&store, "u1", "artist", 1);
        let ctx = context(store.clone());
        ctx.cancellation_token.cancel();

        assert!(matches!(
            ScoreRefreshJob::default().execute(&ctx),
            Err(JobError::Cancelled)
        ));
        assert_eq!(store.get_dirty_cohorts().unwrap().len(), 1);
    }

    #[test]
    fn rejects_bad_params() {
        let store = Arc::new(SqliteListeningStore::in_memory().unwrap());
        let result = ScoreRefreshJob::default().execute_with_params(
            &context(store),
            Some(serde_json::json!({ "full": "yes" })),
        );
        assert!(matches!(result, Err(JobError::ExecutionFailed(_))));
    }
}
