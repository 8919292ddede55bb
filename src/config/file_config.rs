use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub admin_token: Option<String>,

    // Feature configs
    pub score: Option<ScoreFileConfig>,
    pub leaderboard: Option<LeaderboardFileConfig>,
    pub ingestion: Option<IngestionFileConfig>,
    pub background_jobs: Option<BackgroundJobsConfig>,
}

/// Initial score weights, only used to seed an empty database.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScoreFileConfig {
    pub stream_weight: Option<f64>,
    pub duration_weight: Option<f64>,
    pub completion_weight: Option<f64>,
    pub recency_weight: Option<f64>,
    pub engagement_weight: Option<f64>,
    pub fan_spread_weight: Option<f64>,
    pub recency_decay_lambda: Option<f64>,
    pub low_completion_threshold: Option<f64>,
    pub low_completion_penalty: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LeaderboardFileConfig {
    pub capacity: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IngestionFileConfig {
    pub default_duration_ms: Option<i64>,
    /// "spotify" or "apple_music"
    pub primary_platform: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub score_refresh_interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
