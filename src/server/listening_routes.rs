//! Listener-facing HTTP routes.
//!
//! Every route here identifies the caller through the [`Session`] extractor.
//! Store work is blocking SQLite access and runs on the blocking pool.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::admin_routes::rescore_cohort;
use super::metrics::record_error;
use super::session::Session;
use super::state::{GuardedIngestor, GuardedLeaderboardCache, GuardedListeningStore, ServerState};
use crate::ingestion::{IngestRequest, IngestionError, DEFAULT_REGION};
use crate::leaderboard::TimeWindow;
use crate::listening_store::{EngagementDelta, Platform, PlatformConnection};
use crate::scoring::ScoreCalculator;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(super) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Logs the failure and answers 500 without leaking the cause.
pub(super) fn internal_error(endpoint: &str, e: impl std::fmt::Display) -> Response {
    error!("{} failed: {}", endpoint, e);
    record_error("internal", endpoint);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

pub(super) fn task_failed(endpoint: &str, e: tokio::task::JoinError) -> Response {
    internal_error(endpoint, format!("blocking task failed: {}", e))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorResponse {
    pub user_id: String,
    pub last_ingested_played_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct PlatformConnectionBody {
    pub platform: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementBody {
    pub artist_id: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(flatten)]
    pub delta: EngagementDelta,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub time_window: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScoreQuery {
    #[serde(default)]
    pub region: Option<String>,
    /// Defaults to the caller.
    #[serde(default)]
    pub user_id: Option<String>,
}

fn region_or_default(region: Option<String>) -> String {
    region
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /ingest
async fn ingest(
    session: Session,
    State(ingestor): State<GuardedIngestor>,
    State(shutdown_token): State<CancellationToken>,
    Json(body): Json<IngestRequest>,
) -> Response {
    let cancel = shutdown_token.child_token();
    let user_id = session.user_id;

    let result = tokio::task::spawn_blocking(move || {
        ingestor.ingest(&user_id, &body.events, &cancel)
    })
    .await;

    match result {
        Ok(Ok(report)) => Json(report).into_response(),
        Ok(Err(IngestionError::NotAuthenticated)) => StatusCode::FORBIDDEN.into_response(),
        Ok(Err(e @ IngestionError::NoPlatformConnection(_))) => {
            error_response(StatusCode::PRECONDITION_FAILED, e.to_string())
        }
        Ok(Err(e @ IngestionError::Store(_))) => internal_error("/v1/ingest", e),
        Err(e) => task_failed("/v1/ingest", e),
    }
}

/// GET /ingest/cursor
async fn get_cursor(session: Session, State(store): State<GuardedListeningStore>) -> Response {
    let user_id = session.user_id;
    let result = tokio::task::spawn_blocking(move || {
        store.get_cursor(&user_id).map(|cursor| CursorResponse {
            user_id,
            last_ingested_played_at: cursor,
        })
    })
    .await;

    match result {
        Ok(Ok(cursor)) => Json(cursor).into_response(),
        Ok(Err(e)) => internal_error("/v1/ingest/cursor", format!("{:#}", e)),
        Err(e) => task_failed("/v1/ingest/cursor", e),
    }
}

/// PUT /platform-connection
async fn put_platform_connection(
    session: Session,
    State(store): State<GuardedListeningStore>,
    Json(body): Json<PlatformConnectionBody>,
) -> Response {
    let platform = match body.platform.trim().parse::<Platform>() {
        Ok(platform) => platform,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let connection = PlatformConnection {
        user_id: session.user_id,
        platform,
        connected_at: Utc::now(),
    };

    let result = tokio::task::spawn_blocking(move || {
        store.set_platform_connection(&connection).map(|_| connection)
    })
    .await;

    match result {
        Ok(Ok(connection)) => {
            info!(
                "User {} connected platform {}",
                connection.user_id, connection.platform
            );
            Json(connection).into_response()
        }
        Ok(Err(e)) => internal_error("/v1/platform-connection", format!("{:#}", e)),
        Err(e) => task_failed("/v1/platform-connection", e),
    }
}

/// POST /engagement
async fn post_engagement(
    session: Session,
    State(store): State<GuardedListeningStore>,
    Json(body): Json<EngagementBody>,
) -> Response {
    let delta = body.delta;
    if delta.album_saves < 0 || delta.track_likes < 0 || delta.playlist_adds < 0 {
        return error_response(StatusCode::BAD_REQUEST, "Engagement deltas must not be negative");
    }
    let artist_id = body.artist_id.trim().to_string();
    if artist_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "artistId is required");
    }
    let region = region_or_default(body.region);
    let user_id = session.user_id;

    let result = tokio::task::spawn_blocking(move || {
        if store.get_artist(&artist_id)?.is_none() {
            return Ok(None);
        }
        store
            .add_engagement(&user_id, &artist_id, &region, &delta)
            .map(Some)
    })
    .await;

    match result {
        Ok(Ok(Some(stats))) => Json(stats).into_response(),
        Ok(Ok(None)) => error_response(StatusCode::NOT_FOUND, "Unknown artist"),
        Ok(Err(e)) => internal_error("/v1/engagement", format!("{:#}", e)),
        Err(e) => task_failed("/v1/engagement", e),
    }
}

/// GET /leaderboard/{artist_id}
async fn get_leaderboard(
    session: Session,
    State(leaderboard): State<GuardedLeaderboardCache>,
    Path(artist_id): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Response {
    let window = match query.time_window.as_deref() {
        Some(raw) => match raw.parse::<TimeWindow>() {
            Ok(window) => window,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
        },
        None => TimeWindow::default(),
    };
    let region = region_or_default(query.region);
    let requester = session.user_id;

    let result = tokio::task::spawn_blocking(move || {
        leaderboard.get_leaderboard(&artist_id, &region, window, Some(&requester))
    })
    .await;

    match result {
        Ok(Ok(view)) => Json(view).into_response(),
        Ok(Err(e)) => internal_error("/v1/leaderboard", format!("{:#}", e)),
        Err(e) => task_failed("/v1/leaderboard", e),
    }
}

/// GET /score/{artist_id}
///
/// Computes the score from current data, persists it and returns every
/// intermediate value.
async fn get_score(
    session: Session,
    State(store): State<GuardedListeningStore>,
    Path(artist_id): Path<String>,
    Query(query): Query<ScoreQuery>,
) -> Response {
    let region = region_or_default(query.region);
    let user_id = query
        .user_id
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or(session.user_id);

    let result = tokio::task::spawn_blocking(move || {
        let calculator = ScoreCalculator::from_store(store)?;
        calculator
            .score(&user_id, &artist_id, &region, Utc::now())
            .map_err(anyhow::Error::from)
    })
    .await;

    match result {
        Ok(Ok(Some(breakdown))) => Json(breakdown).into_response(),
        Ok(Ok(None)) => error_response(StatusCode::NOT_FOUND, "No listening data"),
        Ok(Err(e)) => internal_error("/v1/score", format!("{:#}", e)),
        Err(e) => task_failed("/v1/score", e),
    }
}

/// GET /artists/{artist_id}
async fn get_artist(
    _session: Session,
    State(store): State<GuardedListeningStore>,
    Path(artist_id): Path<String>,
) -> Response {
    let result = tokio::task::spawn_blocking(move || store.get_artist(&artist_id)).await;

    match result {
        Ok(Ok(Some(artist))) => Json(artist).into_response(),
        Ok(Ok(None)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => internal_error("/v1/artists", format!("{:#}", e)),
        Err(e) => task_failed("/v1/artists", e),
    }
}

/// DELETE /me
///
/// Erases every trace of the caller, then rescores the cohorts they were in
/// so that the remaining listeners are normalized without them.
async fn delete_me(
    session: Session,
    State(store): State<GuardedListeningStore>,
    State(leaderboard): State<GuardedLeaderboardCache>,
) -> Response {
    let user_id = session.user_id;

    let result = tokio::task::spawn_blocking(move || {
        let summary = store.erase_user(&user_id)?;
        info!(
            "Erased user {}: {} events, {} stats rows, {} leaderboard entries",
            user_id, summary.play_events, summary.listener_stats, summary.leaderboard_entries
        );
        for (artist_id, region) in &summary.affected_cohorts {
            if let Err(e) = rescore_cohort(&store, &leaderboard, artist_id, region) {
                warn!(
                    "Failed to rescore cohort {}/{} after erasure: {:#}",
                    artist_id, region, e
                );
            }
        }
        anyhow::Ok(summary)
    })
    .await;

    match result {
        Ok(Ok(summary)) => Json(summary).into_response(),
        Ok(Err(e)) => internal_error("/v1/me", format!("{:#}", e)),
        Err(e) => task_failed("/v1/me", e),
    }
}

/// Routes mounted under `/v1`.
pub fn listening_routes() -> Router<ServerState> {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/ingest/cursor", get(get_cursor))
        .route("/platform-connection", put(put_platform_connection))
        .route("/engagement", post(post_engagement))
        .route("/leaderboard/{artist_id}", get(get_leaderboard))
        .route("/score/{artist_id}", get(get_score))
        .route("/artists/{artist_id}", get(get_artist))
        .route("/me", delete(delete_me))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_defaults_to_global() {
        assert_eq!(region_or_default(None), "global");
        assert_eq!(region_or_default(Some("  ".to_string())), "global");
        assert_eq!(region_or_default(Some(" IT ".to_string())), "IT");
    }

    #[test]
    fn engagement_body_flattens_counters() {
        let body: EngagementBody = serde_json::from_value(serde_json::json!({
            "artistId": "a1",
            "albumSaves": 2,
            "playlistAdds": 1
        }))
        .unwrap();
        assert_eq!(body.artist_id, "a1");
        assert!(body.region.is_none());
        assert_eq!(
            body.delta,
            EngagementDelta {
                album_saves: 2,
                track_likes: 0,
                playlist_adds: 1
            }
        );
    }
}
