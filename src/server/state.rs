use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::ingestion::PlayEventIngestor;
use crate::leaderboard::LeaderboardCache;
use crate::listening_store::ListeningStore;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ServerConfig;

pub type GuardedListeningStore = Arc<dyn ListeningStore>;
pub type GuardedIngestor = Arc<PlayEventIngestor>;
pub type GuardedLeaderboardCache = Arc<LeaderboardCache>;
pub type OptionalSchedulerHandle = Option<SchedulerHandle>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub listening_store: GuardedListeningStore,
    pub ingestor: GuardedIngestor,
    pub leaderboard: GuardedLeaderboardCache,
    pub scheduler_handle: OptionalSchedulerHandle,
    /// Cancelled on shutdown, aborts in-flight ingest batches.
    pub shutdown_token: CancellationToken,
    pub hash: String,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedListeningStore {
    fn from_ref(input: &ServerState) -> Self {
        input.listening_store.clone()
    }
}

impl FromRef<ServerState> for GuardedIngestor {
    fn from_ref(input: &ServerState) -> Self {
        input.ingestor.clone()
    }
}

impl FromRef<ServerState> for GuardedLeaderboardCache {
    fn from_ref(input: &ServerState) -> Self {
        input.leaderboard.clone()
    }
}

impl FromRef<ServerState> for OptionalSchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}

impl FromRef<ServerState> for CancellationToken {
    fn from_ref(input: &ServerState) -> Self {
        input.shutdown_token.clone()
    }
}
