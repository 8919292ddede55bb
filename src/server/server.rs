use anyhow::{Context, Result};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::admin_routes::admin_routes;
use super::listening_routes::listening_routes;
use super::metrics::metrics_handler;
use super::{log_requests, state::*, ServerConfig};
use crate::background_jobs::SchedulerHandle;
use crate::ingestion::{IngestorConfig, PlayEventIngestor};
use crate::leaderboard::LeaderboardCache;
use crate::listening_store::ListeningStore;

#[derive(Serialize)]
struct ServerStats {
    pub service: String,
    pub version: String,
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        listening_store: Arc<dyn ListeningStore>,
        ingestor_config: IngestorConfig,
        scheduler_handle: Option<SchedulerHandle>,
        shutdown_token: CancellationToken,
    ) -> ServerState {
        let ingestor = Arc::new(PlayEventIngestor::new(
            listening_store.clone(),
            ingestor_config,
        ));
        let leaderboard = Arc::new(LeaderboardCache::new(
            listening_store.clone(),
            config.leaderboard,
        ));
        ServerState {
            config,
            start_time: Instant::now(),
            listening_store,
            ingestor,
            leaderboard,
            scheduler_handle,
            shutdown_token,
            hash: env!("GIT_HASH").to_owned(),
        }
    }
}

pub fn make_app(state: ServerState) -> Result<Router> {
    let v1_routes: Router = listening_routes()
        .nest("/admin", admin_routes())
        .with_state(state.clone());

    let home_router: Router = Router::new()
        .route("/", get(home))
        .with_state(state.clone());

    let mut app: Router = home_router.nest("/v1", v1_routes);
    app = app.layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves the API on `config.port` and the Prometheus endpoint on
/// `config.metrics_port` until `shutdown_token` is cancelled.
pub async fn run_server(
    listening_store: Arc<dyn ListeningStore>,
    config: ServerConfig,
    ingestor_config: IngestorConfig,
    scheduler_handle: Option<SchedulerHandle>,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let state = ServerState::new(
        config,
        listening_store,
        ingestor_config,
        scheduler_handle,
        shutdown_token.clone(),
    );
    let app = make_app(state)?;

    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
    let metrics_token = shutdown_token.clone();
    tokio::spawn(async move {
        let result = axum::serve(metrics_listener, make_metrics_app())
            .with_graceful_shutdown(async move { metrics_token.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;
    Ok(())
}
