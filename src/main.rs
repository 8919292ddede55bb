use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use listener_score_server::background_jobs::jobs::ScoreRefreshJob;
use listener_score_server::background_jobs::{create_scheduler, JobContext};
use listener_score_server::config;
use listener_score_server::listening_store::{ListeningStore, SqliteListeningStore};
use listener_score_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the listening database (listening.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Seconds between two runs of the score refresh job.
    #[clap(long)]
    pub score_refresh_interval_secs: Option<u64>,

    /// Token expected in the X-Admin-Token header of admin routes.
    /// Admin routes are disabled when not set.
    #[clap(long)]
    pub admin_token: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            score_refresh_interval_secs: args.score_refresh_interval_secs,
            admin_token: args.admin_token.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!(
        "  primary platform: {}",
        app_config.ingestion.primary_platform
    );
    if app_config.admin_token.is_none() {
        info!("  admin routes disabled (no admin token)");
    }

    if !app_config.listening_db_path().exists() {
        info!(
            "Creating new listening database at {:?}",
            app_config.listening_db_path()
        );
    }
    let listening_store = Arc::new(SqliteListeningStore::new(app_config.listening_db_path())?);
    if listening_store.seed_score_config(&app_config.score)? {
        info!("Seeded score config from configuration");
    } else {
        info!("Using stored score config");
    }

    info!("Initializing metrics...");
    metrics::init_metrics();

    let store_stats = listening_store.get_store_stats()?;
    info!(
        "Listening store has {} artists, {} play events, {} listener stats",
        store_stats.artists, store_stats.play_events, store_stats.listener_stats
    );

    // Set up background job scheduler
    let shutdown_token = CancellationToken::new();
    let job_context = JobContext::new(
        shutdown_token.child_token(),
        listening_store.clone() as Arc<dyn ListeningStore>,
        app_config.leaderboard,
    );
    let (mut scheduler, scheduler_handle) = create_scheduler(shutdown_token.clone(), job_context);
    scheduler
        .register_job(Arc::new(ScoreRefreshJob::new(
            app_config.background_jobs.score_refresh_interval,
        )))
        .await;
    info!(
        "Job scheduler initialized with {} job(s)",
        scheduler.job_count().await
    );

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_token.cancel();
    });

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        metrics_port: app_config.metrics_port,
        admin_token: app_config.admin_token.clone(),
        leaderboard: app_config.leaderboard,
    };

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    let server = run_server(
        listening_store as Arc<dyn ListeningStore>,
        server_config,
        app_config.ingestion.clone(),
        Some(scheduler_handle),
        shutdown_token.clone(),
    );

    // Run HTTP server and job scheduler concurrently
    let (server_result, _) = tokio::join!(
        async {
            let result = server.await;
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            result
        },
        async {
            scheduler.run().await;
            info!("Scheduler stopped");
        }
    );
    server_result
}
