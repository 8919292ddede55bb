use crate::leaderboard::LeaderboardConfig;
use crate::listening_store::ListeningStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    pub listening_store: Arc<dyn ListeningStore>,

    /// Capacity used when jobs rebuild leaderboard snapshots.
    pub leaderboard_config: LeaderboardConfig,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        listening_store: Arc<dyn ListeningStore>,
        leaderboard_config: LeaderboardConfig,
    ) -> Self {
        Self {
            cancellation_token,
            listening_store,
            leaderboard_config,
        }
    }

    /// Same resources, different cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
