//! HTTP client for end-to-end tests
//!
//! Wraps reqwest and provides one method per server endpoint.
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::{RequestBuilder, Response};
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP test client acting as one caller
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    user_id: Option<String>,
    admin_token: Option<String>,
}

impl TestClient {
    /// Creates a client that sends no identity headers
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            user_id: None,
            admin_token: None,
        }
    }

    /// Creates a client identified as `user_id`
    pub fn as_user(base_url: String, user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::new(base_url)
        }
    }

    /// Creates a client carrying the admin token
    pub fn admin(base_url: String) -> Self {
        Self {
            admin_token: Some(ADMIN_TOKEN.to_string()),
            ..Self::new(base_url)
        }
    }

    /// Creates a user client, connects it to `platform` and asserts success
    pub async fn connected(base_url: String, user_id: &str, platform: &str) -> Self {
        let client = Self::as_user(base_url, user_id);
        let response = client.put_platform_connection(platform).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::OK,
            "Platform connection failed: {:?}",
            response.text().await
        );
        client
    }

    fn with_identity(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.user_id {
            Some(user_id) => request.header("X-User-Id", user_id),
            None => request,
        };
        match &self.admin_token {
            Some(token) => request.header("X-Admin-Token", token),
            None => request,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.with_identity(self.client.get(format!("{}{}", self.base_url, path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.with_identity(self.client.post(format!("{}{}", self.base_url, path)))
    }

    fn put(&self, path: &str) -> RequestBuilder {
        self.with_identity(self.client.put(format!("{}{}", self.base_url, path)))
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.with_identity(self.client.delete(format!("{}{}", self.base_url, path)))
    }

    // ========================================================================
    // Listener Endpoints
    // ========================================================================

    /// PUT /v1/platform-connection
    pub async fn put_platform_connection(&self, platform: &str) -> Response {
        self.put("/v1/platform-connection")
            .json(&json!({ "platform": platform }))
            .send()
            .await
            .expect("Platform connection request failed")
    }

    /// POST /v1/ingest
    pub async fn ingest(&self, events: Vec<Value>) -> Response {
        self.post("/v1/ingest")
            .json(&json!({ "events": events }))
            .send()
            .await
            .expect("Ingest request failed")
    }

    /// GET /v1/ingest/cursor
    pub async fn get_cursor(&self) -> Response {
        self.get("/v1/ingest/cursor")
            .send()
            .await
            .expect("Cursor request failed")
    }

    /// POST /v1/engagement
    pub async fn post_engagement(&self, artist_id: &str, album_saves: i64, track_likes: i64) -> Response {
        self.post("/v1/engagement")
            .json(&json!({
                "artistId": artist_id,
                "albumSaves": album_saves,
                "trackLikes": track_likes,
            }))
            .send()
            .await
            .expect("Engagement request failed")
    }

    /// GET /v1/leaderboard/{artist_id}
    pub async fn get_leaderboard(&self, artist_id: &str, time_window: Option<&str>) -> Response {
        let mut request = self.get(&format!("/v1/leaderboard/{}", artist_id));
        if let Some(window) = time_window {
            request = request.query(&[("time_window", window)]);
        }
        request.send().await.expect("Leaderboard request failed")
    }

    /// GET /v1/score/{artist_id}
    pub async fn get_score(&self, artist_id: &str) -> Response {
        self.get(&format!("/v1/score/{}", artist_id))
            .send()
            .await
            .expect("Score request failed")
    }

    /// GET /v1/artists/{artist_id}
    pub async fn get_artist(&self, artist_id: &str) -> Response {
        self.get(&format!("/v1/artists/{}", artist_id))
            .send()
            .await
            .expect("Artist request failed")
    }

    /// DELETE /v1/me
    pub async fn delete_me(&self) -> Response {
        self.delete("/v1/me")
            .send()
            .await
            .expect("Erase request failed")
    }

    // ========================================================================
    // Admin Endpoints
    // ========================================================================

    /// POST /v1/admin/score/{artist_id}
    pub async fn admin_rescore_cohort(&self, artist_id: &str) -> Response {
        self.post(&format!("/v1/admin/score/{}", artist_id))
            .send()
            .await
            .expect("Cohort rescore request failed")
    }

    /// POST /v1/admin/recalculate
    pub async fn admin_trigger_recalculate(&self, params: Option<Value>) -> Response {
        let request = self.post("/v1/admin/recalculate");
        let request = match params {
            Some(params) => request.json(&params),
            None => request,
        };
        request.send().await.expect("Recalculate request failed")
    }

    /// GET /v1/admin/jobs/{job_id}
    pub async fn admin_get_job(&self, job_id: &str) -> Response {
        self.get(&format!("/v1/admin/jobs/{}", job_id))
            .send()
            .await
            .expect("Job request failed")
    }

    /// GET /v1/admin/jobs/{job_id}/history
    pub async fn admin_get_job_history(&self, job_id: &str) -> Response {
        self.get(&format!("/v1/admin/jobs/{}/history", job_id))
            .send()
            .await
            .expect("Job history request failed")
    }

    /// Polls the job history until the most recent run is no longer running
    /// and returns that run.
    pub async fn admin_wait_for_job(&self, job_id: &str) -> Value {
        let start = std::time::Instant::now();
        loop {
            let history: Vec<Value> = self
                .admin_get_job_history(job_id)
                .await
                .json()
                .await
                .expect("Invalid job history");
            if let Some(last) = history.first() {
                if last["status"] != "running" && last["triggeredBy"] == "manual" {
                    return last.clone();
                }
            }
            if start.elapsed() > Duration::from_millis(JOB_COMPLETION_TIMEOUT_MS) {
                panic!("Job {} did not finish in time", job_id);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// GET /v1/admin/score-config
    pub async fn admin_get_score_config(&self) -> Response {
        self.get("/v1/admin/score-config")
            .send()
            .await
            .expect("Score config request failed")
    }

    /// PUT /v1/admin/score-config
    pub async fn admin_put_score_config(&self, config: &Value) -> Response {
        self.put("/v1/admin/score-config")
            .json(config)
            .send()
            .await
            .expect("Score config update failed")
    }

    /// PUT /v1/admin/artists/{artist_id}/catalog
    pub async fn admin_put_catalog(&self, artist_id: &str, track_count: u32) -> Response {
        self.put(&format!("/v1/admin/artists/{}/catalog", artist_id))
            .json(&json!({ "totalCatalogTrackCount": track_count }))
            .send()
            .await
            .expect("Catalog update failed")
    }
}
