mod file_config;

pub use file_config::{
    BackgroundJobsConfig, FileConfig, IngestionFileConfig, LeaderboardFileConfig,
    ScoreFileConfig,
};

use crate::background_jobs::jobs::score_refresh::DEFAULT_INTERVAL;
use crate::ingestion::IngestorConfig;
use crate::leaderboard::LeaderboardConfig;
use crate::listening_store::{Platform, ScoreConfig};
use crate::scoring::validate_score_config;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub score_refresh_interval_secs: Option<u64>,
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    /// Required in the `X-Admin-Token` header of admin routes. Admin routes
    /// are closed when unset.
    pub admin_token: Option<String>,

    // Feature configs (with defaults)
    pub score: ScoreConfig,
    pub leaderboard: LeaderboardConfig,
    pub ingestion: IngestorConfig,
    pub background_jobs: BackgroundJobsSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let admin_token = file
            .admin_token
            .or_else(|| cli.admin_token.clone())
            .filter(|token| !token.trim().is_empty());

        let score = resolve_score_config(file.score.unwrap_or_default())?;

        let lb_file = file.leaderboard.unwrap_or_default();
        let leaderboard_defaults = LeaderboardConfig::default();
        let leaderboard = LeaderboardConfig {
            capacity: lb_file.capacity.unwrap_or(leaderboard_defaults.capacity),
            page_size: lb_file.page_size.unwrap_or(leaderboard_defaults.page_size),
        };
        if leaderboard.capacity == 0 {
            bail!("leaderboard.capacity must be greater than 0");
        }
        if leaderboard.page_size == 0 {
            bail!("leaderboard.page_size must be greater than 0");
        }

        let ingestion_file = file.ingestion.unwrap_or_default();
        let ingestion_defaults = IngestorConfig::default();
        let primary_platform = match ingestion_file.primary_platform {
            Some(s) => s
                .parse::<Platform>()
                .map_err(|e| anyhow::anyhow!("Invalid ingestion.primary_platform: {}", e))?,
            None => ingestion_defaults.primary_platform,
        };
        let default_duration_ms = ingestion_file
            .default_duration_ms
            .unwrap_or(ingestion_defaults.default_duration_ms);
        if default_duration_ms <= 0 {
            bail!("ingestion.default_duration_ms must be greater than 0");
        }
        let ingestion = IngestorConfig {
            default_duration_ms,
            primary_platform,
        };

        let refresh_secs = file
            .background_jobs
            .and_then(|jobs| jobs.score_refresh_interval_secs)
            .or(cli.score_refresh_interval_secs);
        let background_jobs = match refresh_secs {
            Some(0) => bail!("score_refresh_interval_secs must be greater than 0"),
            Some(secs) => BackgroundJobsSettings {
                score_refresh_interval: Duration::from_secs(secs),
            },
            None => BackgroundJobsSettings::default(),
        };

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            admin_token,
            score,
            leaderboard,
            ingestion,
            background_jobs,
        })
    }

    pub fn listening_db_path(&self) -> PathBuf {
        self.db_dir.join("listening.db")
    }
}

#[derive(Debug, Clone)]
pub struct BackgroundJobsSettings {
    pub score_refresh_interval: Duration,
}

impl Default for BackgroundJobsSettings {
    fn default() -> Self {
        Self {
            score_refresh_interval: DEFAULT_INTERVAL,
        }
    }
}

fn resolve_score_config(file: ScoreFileConfig) -> Result<ScoreConfig> {
    let defaults = ScoreConfig::default();
    let config = ScoreConfig {
        stream_weight: file.stream_weight.unwrap_or(defaults.stream_weight),
        duration_weight: file.duration_weight.unwrap_or(defaults.duration_weight),
        completion_weight: file.completion_weight.unwrap_or(defaults.completion_weight),
        recency_weight: file.recency_weight.unwrap_or(defaults.recency_weight),
        engagement_weight: file.engagement_weight.unwrap_or(defaults.engagement_weight),
        fan_spread_weight: file.fan_spread_weight.unwrap_or(defaults.fan_spread_weight),
        recency_decay_lambda: file
            .recency_decay_lambda
            .unwrap_or(defaults.recency_decay_lambda),
        low_completion_threshold: file
            .low_completion_threshold
            .unwrap_or(defaults.low_completion_threshold),
        low_completion_penalty: file
            .low_completion_penalty
            .unwrap_or(defaults.low_completion_penalty),
    };
    validate_score_config(&config).map_err(|e| anyhow::anyhow!("Invalid [score] section: {}", e))?;
    Ok(config)
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_temp_db_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    fn cli_for(temp_dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("headers"),
            Some(RequestsLoggingLevel::Headers)
        ));
        // Case insensitive
        assert!(matches!(
            parse_logging_level("BODY"),
            Some(RequestsLoggingLevel::Body)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Headers,
            score_refresh_interval_secs: Some(120),
            admin_token: Some("cli-token".to_string()),
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.port, 3001);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.admin_token.as_deref(), Some("cli-token"));
        assert_eq!(
            config.background_jobs.score_refresh_interval,
            Duration::from_secs(120)
        );
        assert_eq!(config.score, ScoreConfig::default());
        assert_eq!(config.leaderboard.capacity, 100);
        assert_eq!(config.leaderboard.page_size, 20);
        assert_eq!(config.ingestion.default_duration_ms, 180_000);
        assert_eq!(config.ingestion.primary_platform, Platform::Spotify);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            score_refresh_interval_secs: Some(120),
            admin_token: Some("cli-token".to_string()),
        };

        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            port: Some(4000),
            logging_level: Some("body".to_string()),
            admin_token: Some("toml-token".to_string()),
            background_jobs: Some(BackgroundJobsConfig {
                score_refresh_interval_secs: Some(30),
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Body);
        assert_eq!(config.admin_token.as_deref(), Some("toml-token"));
        assert_eq!(
            config.background_jobs.score_refresh_interval,
            Duration::from_secs(30)
        );
        // CLI value used when TOML doesn't specify
        assert_eq!(config.metrics_port, 9091);
    }

    #[test]
    fn test_resolve_feature_sections() {
        let temp_dir = make_temp_db_dir();
        let file_config = FileConfig {
            score: Some(ScoreFileConfig {
                stream_weight: Some(0.5),
                low_completion_penalty: Some(0.8),
                ..Default::default()
            }),
            leaderboard: Some(LeaderboardFileConfig {
                capacity: Some(10),
                page_size: None,
            }),
            ingestion: Some(IngestionFileConfig {
                default_duration_ms: Some(200_000),
                primary_platform: Some("apple_music".to_string()),
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli_for(&temp_dir), Some(file_config)).unwrap();

        assert_eq!(config.score.stream_weight, 0.5);
        assert_eq!(config.score.low_completion_penalty, 0.8);
        assert_eq!(config.score.duration_weight, 0.25);
        assert_eq!(config.leaderboard.capacity, 10);
        assert_eq!(config.leaderboard.page_size, 20);
        assert_eq!(config.ingestion.default_duration_ms, 200_000);
        assert_eq!(config.ingestion.primary_platform, Platform::AppleMusic);
    }

    #[test]
    fn test_resolve_rejects_invalid_sections() {
        let temp_dir = make_temp_db_dir();

        let bad_penalty = FileConfig {
            score: Some(ScoreFileConfig {
                low_completion_penalty: Some(1.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli_for(&temp_dir), Some(bad_penalty)).unwrap_err();
        assert!(err.to_string().contains("[score]"));

        let bad_capacity = FileConfig {
            leaderboard: Some(LeaderboardFileConfig {
                capacity: Some(0),
                page_size: None,
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(bad_capacity)).is_err());

        let bad_platform = FileConfig {
            ingestion: Some(IngestionFileConfig {
                default_duration_ms: None,
                primary_platform: Some("tidal".to_string()),
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli_for(&temp_dir), Some(bad_platform)).unwrap_err();
        assert!(err.to_string().contains("primary_platform"));

        let zero_interval = CliConfig {
            score_refresh_interval_secs: Some(0),
            ..cli_for(&temp_dir)
        };
        assert!(AppConfig::resolve(&zero_interval, None).is_err());
    }

    #[test]
    fn test_blank_admin_token_is_ignored() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            admin_token: Some("  ".to_string()),
            ..cli_for(&temp_dir)
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let cli = CliConfig::default();
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_db_path_helpers() {
        let temp_dir = make_temp_db_dir();
        let config = AppConfig::resolve(&cli_for(&temp_dir), None).unwrap();
        assert_eq!(
            config.listening_db_path(),
            temp_dir.path().join("listening.db")
        );
    }
}
