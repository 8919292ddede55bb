use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all listener score metrics
const PREFIX: &str = "listener_score";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Ingestion Metrics
    pub static ref EVENTS_INGESTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_events_ingested_total"), "Play events by ingestion outcome"),
        &["outcome"]
    ).expect("Failed to create events_ingested_total metric");

    pub static ref INGEST_BATCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ingest_batches_total"), "Ingest batches by result"),
        &["result"]
    ).expect("Failed to create ingest_batches_total metric");

    pub static ref IDENTITY_RESOLUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_identity_resolutions_total"),
            "Artist identity resolutions by the tier that produced them"
        ),
        &["tier"]
    ).expect("Failed to create identity_resolutions_total metric");

    // Scoring Metrics
    pub static ref SCORE_COMPUTATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_score_computations_total"), "Listener score computations"),
        &["outcome"]
    ).expect("Failed to create score_computations_total metric");

    pub static ref LEADERBOARD_REFRESHES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_leaderboard_refreshes_total"),
        "Total leaderboard cache rebuilds"
    ).expect("Failed to create leaderboard_refreshes_total metric");

    pub static ref LEADERBOARD_ENTRIES_CACHED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_leaderboard_entries_cached_total"),
        "Total entries written by leaderboard cache rebuilds"
    ).expect("Failed to create leaderboard_entries_cached_total metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    // Error Metrics
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by type"),
        &["error_type", "endpoint"]
    ).expect("Failed to create errors_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Already registered metrics are ignored, tests call this repeatedly
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(EVENTS_INGESTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INGEST_BATCHES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(IDENTITY_RESOLUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SCORE_COMPUTATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LEADERBOARD_REFRESHES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LEADERBOARD_ENTRIES_CACHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_ingested_events(outcome: &str, count: usize) {
    if count > 0 {
        EVENTS_INGESTED_TOTAL
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

pub fn record_ingest_batch(result: &str) {
    INGEST_BATCHES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_identity_resolution(tier: &str) {
    IDENTITY_RESOLUTIONS_TOTAL.with_label_values(&[tier]).inc();
}

pub fn record_score_computation(outcome: &str) {
    SCORE_COMPUTATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_leaderboard_refresh(cached_entries: usize) {
    LEADERBOARD_REFRESHES_TOTAL.inc();
    LEADERBOARD_ENTRIES_CACHED_TOTAL.inc_by(cached_entries as f64);
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_error(error_type: &str, endpoint: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type, endpoint]).inc();
}

/// Collapses path parameters so that metric label cardinality stays bounded.
pub fn categorize_endpoint(path: &str) -> String {
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    match segments.as_slice() {
        ["", "v1", "leaderboard", _] => "/v1/leaderboard/{artist_id}".to_string(),
        ["", "v1", "score", _] => "/v1/score/{artist_id}".to_string(),
        ["", "v1", "artists", _] => "/v1/artists/{artist_id}".to_string(),
        ["", "v1", "admin", "score", _] => "/v1/admin/score/{artist_id}".to_string(),
        ["", "v1", "admin", "artists", _, "catalog"] => {
            "/v1/admin/artists/{artist_id}/catalog".to_string()
        }
        _ => path.to_string(),
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
