use super::RequestsLoggingLevel;
use crate::leaderboard::LeaderboardConfig;

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    pub metrics_port: u16,
    /// Expected `X-Admin-Token` value. Admin routes reject every request
    /// when this is `None`.
    pub admin_token: Option<String>,
    pub leaderboard: LeaderboardConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            metrics_port: 9091,
            admin_token: None,
            leaderboard: LeaderboardConfig::default(),
        }
    }
}
