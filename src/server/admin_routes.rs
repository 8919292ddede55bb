//! Operator routes, all guarded by [`AdminSession`].

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use super::listening_routes::{error_response, internal_error, task_failed};
use super::session::AdminSession;
use super::state::{
    GuardedLeaderboardCache, GuardedListeningStore, OptionalSchedulerHandle, ServerState,
};
use crate::background_jobs::jobs::SCORE_REFRESH_JOB_ID;
use crate::background_jobs::JobError;
use crate::ingestion::DEFAULT_REGION;
use crate::leaderboard::LeaderboardCache;
use crate::listening_store::{ListeningStore, ScoreConfig};
use crate::scoring::{validate_score_config, ScoreCalculator};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortRefreshResponse {
    pub artist_id: String,
    pub region: String,
    pub scored: usize,
    pub failed: usize,
    pub cached_entries: usize,
}

#[derive(Debug, Deserialize)]
pub struct RegionQuery {
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogBody {
    pub total_catalog_track_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub job_id: String,
    pub triggered: bool,
}

/// Recomputes every score of one cohort and rebuilds its leaderboard
/// snapshot from the fresh scores.
pub(super) fn rescore_cohort(
    store: &std::sync::Arc<dyn ListeningStore>,
    leaderboard: &LeaderboardCache,
    artist_id: &str,
    region: &str,
) -> anyhow::Result<CohortRefreshResponse> {
    let now = Utc::now();
    let calculator = ScoreCalculator::from_store(store.clone())?;
    let recalculation = calculator.recalculate_cohort(artist_id, region, now)?;
    let cached_entries = leaderboard.refresh_at(artist_id, region, now)?;
    Ok(CohortRefreshResponse {
        artist_id: artist_id.to_string(),
        region: region.to_string(),
        scored: recalculation.scored,
        failed: recalculation.failed,
        cached_entries,
    })
}

/// POST /score/{artist_id}
async fn post_cohort_score(
    _admin: AdminSession,
    State(store): State<GuardedListeningStore>,
    State(leaderboard): State<GuardedLeaderboardCache>,
    Path(artist_id): Path<String>,
    Query(query): Query<RegionQuery>,
) -> Response {
    let region = query
        .region
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string());

    let result = tokio::task::spawn_blocking(move || {
        rescore_cohort(&store, &leaderboard, &artist_id, &region)
    })
    .await;

    match result {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(e)) => internal_error("/v1/admin/score", format!("{:#}", e)),
        Err(e) => task_failed("/v1/admin/score", e),
    }
}

/// POST /recalculate
///
/// Triggers the score refresh job. An optional JSON body is passed through
/// as job parameters, e.g. `{"full": true}`.
async fn post_recalculate(
    _admin: AdminSession,
    State(scheduler): State<OptionalSchedulerHandle>,
    body: Bytes,
) -> Response {
    let Some(scheduler) = scheduler else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Job scheduler not running");
    };
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice::<JsonValue>(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e))
            }
        }
    };

    match scheduler.trigger_job(SCORE_REFRESH_JOB_ID, params).await {
        Ok(()) => {
            info!("Score refresh triggered by admin");
            (
                StatusCode::ACCEPTED,
                Json(TriggerResponse {
                    job_id: SCORE_REFRESH_JOB_ID.to_string(),
                    triggered: true,
                }),
            )
                .into_response()
        }
        Err(JobError::AlreadyRunning) => {
            error_response(StatusCode::CONFLICT, "Score refresh is already running")
        }
        Err(JobError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error("/v1/admin/recalculate", e),
    }
}

/// GET /jobs
async fn get_jobs(
    _admin: AdminSession,
    State(scheduler): State<OptionalSchedulerHandle>,
) -> Response {
    match scheduler {
        Some(scheduler) => Json(scheduler.list_jobs().await).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "Job scheduler not running"),
    }
}

/// GET /jobs/{job_id}
async fn get_job(
    _admin: AdminSession,
    State(scheduler): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    let Some(scheduler) = scheduler else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Job scheduler not running");
    };
    match scheduler.get_job(&job_id).await {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /jobs/{job_id}/history
async fn get_job_history(
    _admin: AdminSession,
    State(scheduler): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let Some(scheduler) = scheduler else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Job scheduler not running");
    };
    if !scheduler.job_exists(&job_id).await {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(scheduler.get_job_history(&job_id, query.limit).await).into_response()
}

/// GET /score-config
async fn get_score_config(
    _admin: AdminSession,
    State(store): State<GuardedListeningStore>,
) -> Response {
    match tokio::task::spawn_blocking(move || store.get_score_config()).await {
        Ok(Ok(config)) => Json(config).into_response(),
        Ok(Err(e)) => internal_error("/v1/admin/score-config", format!("{:#}", e)),
        Err(e) => task_failed("/v1/admin/score-config", e),
    }
}

/// PUT /score-config
///
/// Replaces the stored weights. Scores computed afterwards use them; the
/// next full refresh brings existing scores in line.
async fn put_score_config(
    _admin: AdminSession,
    State(store): State<GuardedListeningStore>,
    Json(config): Json<ScoreConfig>,
) -> Response {
    if let Err(e) = validate_score_config(&config) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let result = tokio::task::spawn_blocking(move || {
        store.set_score_config(&config).map(|_| config)
    })
    .await;

    match result {
        Ok(Ok(config)) => {
            info!("Score config replaced: {:?}", config);
            Json(config).into_response()
        }
        Ok(Err(e)) => internal_error("/v1/admin/score-config", format!("{:#}", e)),
        Err(e) => task_failed("/v1/admin/score-config", e),
    }
}

/// PUT /artists/{artist_id}/catalog
async fn put_artist_catalog(
    _admin: AdminSession,
    State(store): State<GuardedListeningStore>,
    Path(artist_id): Path<String>,
    Json(body): Json<CatalogBody>,
) -> Response {
    let result = tokio::task::spawn_blocking(move || {
        if !store.set_catalog_track_count(&artist_id, body.total_catalog_track_count)? {
            return Ok(None);
        }
        store.get_artist(&artist_id)
    })
    .await;

    match result {
        Ok(Ok(Some(artist))) => Json(artist).into_response(),
        Ok(Ok(None)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => internal_error("/v1/admin/artists/catalog", format!("{:#}", e)),
        Err(e) => task_failed("/v1/admin/artists/catalog", e),
    }
}

/// GET /stats
async fn get_store_stats(
    _admin: AdminSession,
    State(store): State<GuardedListeningStore>,
) -> Response {
    match tokio::task::spawn_blocking(move || store.get_store_stats()).await {
        Ok(Ok(stats)) => Json(stats).into_response(),
        Ok(Err(e)) => internal_error("/v1/admin/stats", format!("{:#}", e)),
        Err(e) => task_failed("/v1/admin/stats", e),
    }
}

/// Routes mounted under `/v1/admin`.
pub fn admin_routes() -> Router<ServerState> {
    Router::new()
        .route("/score/{artist_id}", post(post_cohort_score))
        .route("/recalculate", post(post_recalculate))
        .route("/jobs", get(get_jobs))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/history", get(get_job_history))
        .route("/score-config", get(get_score_config).put(put_score_config))
        .route("/artists/{artist_id}/catalog", put(put_artist_catalog))
        .route("/stats", get(get_store_stats))
}
