//! Play event ingestion.
//!
//! A batch is processed event by event: validation, identity resolution and
//! persistence failures are recorded against the single event and the batch
//! carries on. Only missing preconditions (no caller, no platform connection)
//! abort a call, and they are checked before any event is touched.

use super::models::{
    EventErrorDetail, IngestReport, RawPlayEvent, ValidatedEvent, DEFAULT_DURATION_MS,
};
use crate::identity::{IdentityResolver, ResolveRequest};
use crate::listening_store::{EventInsertOutcome, ListeningStore, Platform};
use crate::server::metrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Caller is not authenticated")]
    NotAuthenticated,

    #[error("User {0} has no platform connection on file")]
    NoPlatformConnection(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Duration used when an event reports none.
    pub default_duration_ms: i64,
    /// Platform whose artist ids are used verbatim as unified ids.
    pub primary_platform: Platform,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            default_duration_ms: DEFAULT_DURATION_MS,
            primary_platform: Platform::Spotify,
        }
    }
}

enum EventOutcome {
    Stored(EventInsertOutcome, DateTime<Utc>),
    Failed(EventErrorDetail),
}

pub struct PlayEventIngestor {
    store: Arc<dyn ListeningStore>,
    resolver: IdentityResolver,
    config: IngestorConfig,
    /// One lock per user currently ingesting, so batches of the same user
    /// never interleave.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PlayEventIngestor {
    pub fn new(store: Arc<dyn ListeningStore>, config: IngestorConfig) -> Self {
        let resolver = IdentityResolver::new(store.clone(), config.primary_platform);
        Self {
            store,
            resolver,
            config,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap();
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_user_lock(&self, user_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock().unwrap();
        drop(lock);
        // Only the map still holds it: nobody is waiting.
        if locks
            .get(user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(user_id);
        }
    }

    /// Ingests a batch for `user_id`. `cancel` is checked between events;
    /// everything committed before cancellation stays committed and the
    /// cursor still advances over it.
    pub fn ingest(
        &self,
        user_id: &str,
        events: &[RawPlayEvent],
        cancel: &CancellationToken,
    ) -> Result<IngestReport, IngestionError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            metrics::record_ingest_batch("rejected");
            return Err(IngestionError::NotAuthenticated);
        }
        if self.store.get_platform_connection(user_id)?.is_none() {
            metrics::record_ingest_batch("rejected");
            return Err(IngestionError::NoPlatformConnection(user_id.to_string()));
        }

        let lock = self.user_lock(user_id);
        let report = {
            let _guard = lock.lock().unwrap();
            self.ingest_locked(user_id, events, cancel)
        };
        self.release_user_lock(user_id, lock);
        report
    }

    fn ingest_locked(
        &self,
        user_id: &str,
        events: &[RawPlayEvent],
        cancel: &CancellationToken,
    ) -> Result<IngestReport, IngestionError> {
        let mut report = IngestReport {
            success: true,
            ..Default::default()
        };
        let mut max_played_at: Option<DateTime<Utc>> = None;

        for (index, raw) in events.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    "Ingestion for user {} cancelled after {} of {} events",
                    user_id,
                    index,
                    events.len()
                );
                report.cancelled = true;
                break;
            }

            match self.process_event(user_id, index, raw) {
                EventOutcome::Stored(outcome, played_at) => {
                    report.processed += 1;
                    if outcome == EventInsertOutcome::Duplicate {
                        report.duplicates += 1;
                    }
                    max_played_at = max_played_at.max(Some(played_at));
                }
                EventOutcome::Failed(detail) => {
                    warn!(
                        "Skipping event {} for user {}: {}",
                        detail.index, user_id, detail.message
                    );
                    report.errors += 1;
                    report.error_details.push(detail);
                }
            }
        }

        report.last_ingested_played_at = match max_played_at {
            Some(played_at) => Some(self.store.advance_cursor(user_id, played_at)?),
            None => self.store.get_cursor(user_id)?,
        };

        metrics::record_ingested_events("processed", report.processed - report.duplicates);
        metrics::record_ingested_events("duplicate", report.duplicates);
        metrics::record_ingested_events("error", report.errors);
        metrics::record_ingest_batch(if report.cancelled { "cancelled" } else { "ok" });

        debug!(
            "Ingested batch for user {}: {} processed ({} duplicates), {} errors",
            user_id, report.processed, report.duplicates, report.errors
        );
        Ok(report)
    }

    fn process_event(&self, user_id: &str, index: usize, raw: &RawPlayEvent) -> EventOutcome {
        let failed = |message: String| {
            EventOutcome::Failed(EventErrorDetail {
                index,
                platform_artist_id: raw.platform_artist_id.clone(),
                message,
            })
        };

        let event: ValidatedEvent = match raw.validate(self.config.default_duration_ms) {
            Ok(event) => event,
            Err(e) => return failed(e.to_string()),
        };

        let resolution = self.resolver.resolve(&ResolveRequest {
            platform: event.platform,
            platform_artist_id: &event.platform_artist_id,
            artist_name: &event.artist_name,
            isrc: event.isrc.as_deref(),
            track_name: event.track_name.as_deref(),
        });

        let played_at = event.played_at;
        let play = event.into_play_event(user_id, resolution.unified_artist_id);
        match self.store.record_play_event(&play) {
            Ok(outcome) => EventOutcome::Stored(outcome, played_at),
            Err(e) => failed(format!("failed to store play event: {:#}", e)),
        }
    }
}
