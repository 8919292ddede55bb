//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own database directory.

use super::constants::*;
use listener_score_server::background_jobs::jobs::ScoreRefreshJob;
use listener_score_server::background_jobs::{create_scheduler, JobContext};
use listener_score_server::ingestion::IngestorConfig;
use listener_score_server::leaderboard::LeaderboardConfig;
use listener_score_server::listening_store::{ListeningStore, ScoreConfig, SqliteListeningStore};
use listener_score_server::server::state::ServerState;
use listener_score_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with an isolated database
///
/// When dropped, the server and its scheduler shut down and the temp
/// directory is cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Store for direct database access in tests
    pub store: Arc<SqliteListeningStore>,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    shutdown_token: CancellationToken,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Creates a temporary database directory and opens the store
    /// 2. Starts the job scheduler with the score refresh job
    /// 3. Binds to a random port (127.0.0.1:0)
    /// 4. Spawns the server in a background task
    /// 5. Waits for the server to be ready
    ///
    /// The periodic score refresh interval is long enough to never fire
    /// during a test; tests trigger it explicitly.
    pub async fn spawn() -> Self {
        let temp_db_dir = TempDir::new().expect("Failed to create temp db dir");
        let store = Arc::new(
            SqliteListeningStore::new(temp_db_dir.path().join("listening.db"))
                .expect("Failed to open listening store"),
        );
        store
            .seed_score_config(&ScoreConfig::default())
            .expect("Failed to seed score config");

        let shutdown_token = CancellationToken::new();
        let leaderboard = LeaderboardConfig::default();

        let job_context = JobContext::new(
            shutdown_token.child_token(),
            store.clone() as Arc<dyn ListeningStore>,
            leaderboard,
        );
        let (mut scheduler, scheduler_handle) =
            create_scheduler(shutdown_token.clone(), job_context);
        scheduler
            .register_job(Arc::new(ScoreRefreshJob::new(Duration::from_secs(3600))))
            .await;
        tokio::spawn(async move {
            scheduler.run().await;
        });

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            metrics_port: 0,
            admin_token: Some(ADMIN_TOKEN.to_string()),
            leaderboard,
        };
        let state = ServerState::new(
            config,
            store.clone() as Arc<dyn ListeningStore>,
            IngestorConfig::default(),
            Some(scheduler_handle),
            shutdown_token.clone(),
        );
        let app = make_app(state).expect("Failed to build app");

        let server_token = shutdown_token.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_token.cancelled().await })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            store,
            _temp_db_dir: temp_db_dir,
            shutdown_token,
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the health endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
