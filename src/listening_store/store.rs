//! SQLite-backed listening store implementation.

use super::models::{
    merge_unified_artist, CohortMaxima, EngagementDelta, ErasureSummary, EventInsertOutcome,
    LeaderboardCacheEntry, ListenerStats, ListeningStoreStats, MatchConfidence, MatchMethod,
    Platform, PlatformConnection, PlatformIds, PlayEvent, ScoreConfig, UnifiedArtist,
    ALBUM_SAVE_WEIGHT, PLAYLIST_ADD_WEIGHT, TRACK_LIKE_WEIGHT,
};
use super::schema::LISTENING_VERSIONED_SCHEMAS;
use super::trait_def::ListeningStore;
use crate::sqlite_persistence::migrate_if_needed;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Sort key used for rows that have never been played, placing them last
/// among equal scores.
const NEVER_PLAYED: i64 = i64::MAX;

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn now_millis() -> i64 {
    to_millis(Utc::now())
}

/// Content address of a play event. Two submissions of the same play by the
/// same user produce the same key.
pub fn event_key(event: &PlayEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(event.platform.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(event.platform_artist_id.as_bytes());
    hasher.update(b"|");
    hasher.update(event.platform_track_id.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(to_millis(event.played_at).to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

const ARTIST_COLUMNS: &str = "unified_id, canonical_name, normalized_name, isrc, spotify_id, \
     apple_music_id, total_catalog_track_count, catalog_updated_at";

fn row_to_artist(row: &Row) -> rusqlite::Result<UnifiedArtist> {
    Ok(UnifiedArtist {
        unified_id: row.get(0)?,
        canonical_name: row.get(1)?,
        normalized_name: row.get(2)?,
        isrc: row.get(3)?,
        platform_ids: PlatformIds {
            spotify: row.get(4)?,
            apple_music: row.get(5)?,
        },
        total_catalog_track_count: row.get(6)?,
        catalog_updated_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
    })
}

const STATS_COLUMNS: &str = "user_id, unified_artist_id, region, play_count, total_ms_played, \
     unique_track_count, avg_completion_rate, album_saves, track_likes, playlist_adds, \
     engagement_score, listener_score, last_played_at, score_updated_at";

fn row_to_stats(row: &Row) -> rusqlite::Result<ListenerStats> {
    Ok(ListenerStats {
        user_id: row.get(0)?,
        unified_artist_id: row.get(1)?,
        region: row.get(2)?,
        play_count: row.get(3)?,
        total_ms_played: row.get(4)?,
        unique_track_count: row.get(5)?,
        avg_completion_rate: row.get(6)?,
        album_saves: row.get(7)?,
        track_likes: row.get(8)?,
        playlist_adds: row.get(9)?,
        engagement_score: row.get(10)?,
        listener_score: row.get(11)?,
        last_played_at: row.get::<_, Option<i64>>(12)?.map(from_millis),
        score_updated_at: row.get::<_, Option<i64>>(13)?.map(from_millis),
    })
}

fn select_stats(
    conn: &Connection,
    user_id: &str,
    artist_id: &str,
    region: &str,
) -> rusqlite::Result<Option<ListenerStats>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM listener_stats WHERE user_id = ?1 AND unified_artist_id = ?2 AND region = ?3",
            STATS_COLUMNS
        ),
        params![user_id, artist_id, region],
        row_to_stats,
    )
    .optional()
}

fn select_artist(conn: &Connection, unified_id: &str) -> rusqlite::Result<Option<UnifiedArtist>> {
    conn.query_row(
        &format!("SELECT {} FROM unified_artist WHERE unified_id = ?1", ARTIST_COLUMNS),
        params![unified_id],
        row_to_artist,
    )
    .optional()
}

fn select_cohorts(conn: &Connection, sql: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(sql)?;
    let cohorts = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
    Ok(cohorts)
}

/// SQLite-backed listening store.
#[derive(Clone)]
pub struct SqliteListeningStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteListeningStore {
    /// Opens (creating or migrating if needed) the listening database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref()).with_context(|| {
            format!(
                "Failed to open listening database at {:?}",
                db_path.as_ref()
            )
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on listening database")?;
        migrate_if_needed(&mut conn, LISTENING_VERSIONED_SCHEMAS, "listening")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        let stats = store.get_store_stats()?;
        info!(
            "Listening store ready: {} artists, {} play events, {} stats rows",
            stats.artists, stats.play_events, stats.listener_stats
        );
        Ok(store)
    }

    /// Creates an in-memory store, for tests.
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrate_if_needed(&mut conn, LISTENING_VERSIONED_SCHEMAS, "listening")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Writes `config` as the singleton score config unless one is already stored.
    /// Returns true if the row was written.
    pub fn seed_score_config(&self, config: &ScoreConfig) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO score_config (id, stream_weight, duration_weight, completion_weight,
                recency_weight, engagement_weight, fan_spread_weight, recency_decay_lambda,
                low_completion_threshold, low_completion_penalty, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                config.stream_weight,
                config.duration_weight,
                config.completion_weight,
                config.recency_weight,
                config.engagement_weight,
                config.fan_spread_weight,
                config.recency_decay_lambda,
                config.low_completion_threshold,
                config.low_completion_penalty,
                now_millis(),
            ],
        )?;
        Ok(inserted > 0)
    }
}

impl ListeningStore for SqliteListeningStore {
    fn get_cached_match(
        &self,
        platform: Platform,
        platform_artist_id: &str,
    ) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let unified_id = conn
            .query_row(
                &format!(
                    "SELECT unified_artist_id FROM cross_platform_match WHERE {} = ?1",
                    platform.match_column()
                ),
                params![platform_artist_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(unified_id)
    }

    fn cache_match(
        &self,
        platform: Platform,
        platform_artist_id: &str,
        unified_artist_id: &str,
        confidence: MatchConfidence,
        method: MatchMethod,
    ) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let column = platform.match_column();
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO cross_platform_match
                    ({}, unified_artist_id, confidence, method, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                column
            ),
            params![
                platform_artist_id,
                unified_artist_id,
                confidence.as_str(),
                method.as_str(),
                now_millis()
            ],
        )?;
        let bound: String = conn.query_row(
            &format!(
                "SELECT unified_artist_id FROM cross_platform_match WHERE {} = ?1",
                column
            ),
            params![platform_artist_id],
            |row| row.get(0),
        )?;
        if bound != unified_artist_id {
            debug!(
                "{} artist {} already bound to {}, keeping it",
                platform, platform_artist_id, bound
            );
        }
        Ok(bound)
    }

    fn get_artist(&self, unified_id: &str) -> Result<Option<UnifiedArtist>> {
        let conn = self.conn.lock().unwrap();
        Ok(select_artist(&conn, unified_id)?)
    }

    fn find_artist_by_isrc(&self, isrc: &str) -> Result<Option<UnifiedArtist>> {
        let conn = self.conn.lock().unwrap();
        let artist = conn
            .query_row(
                &format!(
                    "SELECT {} FROM unified_artist WHERE isrc = ?1 ORDER BY created_at, unified_id LIMIT 1",
                    ARTIST_COLUMNS
                ),
                params![isrc],
                row_to_artist,
            )
            .optional()?;
        Ok(artist)
    }

    fn find_artist_by_platform_id(
        &self,
        platform: Platform,
        platform_artist_id: &str,
    ) -> Result<Option<UnifiedArtist>> {
        let column = match platform {
            Platform::Spotify => "spotify_id",
            Platform::AppleMusic => "apple_music_id",
        };
        let conn = self.conn.lock().unwrap();
        let artist = conn
            .query_row(
                &format!(
                    "SELECT {} FROM unified_artist WHERE {} = ?1 ORDER BY created_at, unified_id LIMIT 1",
                    ARTIST_COLUMNS, column
                ),
                params![platform_artist_id],
                row_to_artist,
            )
            .optional()?;
        Ok(artist)
    }

    fn list_artist_names(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT unified_id, normalized_name FROM unified_artist ORDER BY created_at, unified_id",
        )?;
        let names = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(names)
    }

    fn artist_has_track(&self, unified_id: &str, normalized_track_name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(
                "SELECT 1 FROM play_event WHERE unified_artist_id = ?1 AND normalized_track_name = ?2 LIMIT 1",
                params![unified_id, normalized_track_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn upsert_artist(&self, artist: &UnifiedArtist) -> Result<UnifiedArtist> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let merged = match select_artist(&tx, &artist.unified_id)? {
            Some(existing) => merge_unified_artist(&existing, artist),
            None => artist.clone(),
        };
        tx.execute(
            "INSERT INTO unified_artist (unified_id, canonical_name, normalized_name, isrc,
                spotify_id, apple_music_id, total_catalog_track_count, catalog_updated_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(unified_id) DO UPDATE SET
                canonical_name = excluded.canonical_name,
                normalized_name = excluded.normalized_name,
                isrc = excluded.isrc,
                spotify_id = excluded.spotify_id,
                apple_music_id = excluded.apple_music_id,
                total_catalog_track_count = excluded.total_catalog_track_count,
                catalog_updated_at = excluded.catalog_updated_at",
            params![
                merged.unified_id,
                merged.canonical_name,
                merged.normalized_name,
                merged.isrc,
                merged.platform_ids.spotify,
                merged.platform_ids.apple_music,
                merged.total_catalog_track_count,
                merged.catalog_updated_at.map(to_millis),
                now_millis(),
            ],
        )?;
        tx.commit()?;
        Ok(merged)
    }

    fn set_catalog_track_count(&self, unified_id: &str, count: u32) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE unified_artist SET total_catalog_track_count = ?2, catalog_updated_at = ?3
             WHERE unified_id = ?1",
            params![unified_id, count, now_millis()],
        )?;
        Ok(updated > 0)
    }

    fn get_platform_connection(&self, user_id: &str) -> Result<Option<PlatformConnection>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT platform, connected_at FROM platform_connection WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(platform, connected_at)| {
            let platform = platform
                .parse::<Platform>()
                .map_err(anyhow::Error::msg)
                .context("Corrupted platform_connection row")?;
            Ok(PlatformConnection {
                user_id: user_id.to_string(),
                platform,
                connected_at: from_millis(connected_at),
            })
        })
        .transpose()
    }

    fn set_platform_connection(&self, connection: &PlatformConnection) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO platform_connection (user_id, platform, connected_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET platform = excluded.platform, connected_at = excluded.connected_at",
            params![
                connection.user_id,
                connection.platform.as_str(),
                to_millis(connection.connected_at)
            ],
        )?;
        Ok(())
    }

    fn record_play_event(&self, event: &PlayEvent) -> Result<EventInsertOutcome> {
        let key = event_key(event);
        let played_at = to_millis(event.played_at);
        let now = now_millis();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO play_event (event_key, user_id, unified_artist_id, platform,
                platform_artist_id, platform_track_id, isrc, track_name, normalized_track_name,
                played_duration_ms, track_duration_ms, duration_estimated, played_at, region)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                key,
                event.user_id,
                event.unified_artist_id,
                event.platform.as_str(),
                event.platform_artist_id,
                event.platform_track_id,
                event.isrc,
                event.track_name,
                event.normalized_track_name,
                event.played_duration_ms,
                event.track_duration_ms,
                event.duration_estimated,
                played_at,
                event.region,
            ],
        )?;
        if inserted == 0 {
            tx.commit()?;
            return Ok(EventInsertOutcome::Duplicate);
        }

        // Counters are incremented in place so concurrent writers never lose an update.
        tx.execute(
            "INSERT INTO listener_stats (user_id, unified_artist_id, region, play_count,
                total_ms_played, last_played_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)
             ON CONFLICT(user_id, unified_artist_id, region) DO UPDATE SET
                play_count = play_count + 1,
                total_ms_played = total_ms_played + excluded.total_ms_played,
                last_played_at = MAX(COALESCE(last_played_at, excluded.last_played_at), excluded.last_played_at),
                updated_at = excluded.updated_at",
            params![
                event.user_id,
                event.unified_artist_id,
                event.region,
                event.played_duration_ms,
                played_at,
                now
            ],
        )?;

        // Track diversity and completion are derived from every play of the
        // user for this artist, so every region row of the pair is rewritten
        // and marked for rescoring.
        tx.execute(
            "UPDATE listener_stats SET
                unique_track_count = (
                    SELECT COUNT(DISTINCT platform_track_id) FROM play_event
                    WHERE user_id = ?1 AND unified_artist_id = ?2),
                avg_completion_rate = COALESCE((
                    SELECT CAST(SUM(played_duration_ms) AS REAL) / NULLIF(SUM(track_duration_ms), 0)
                    FROM play_event WHERE user_id = ?1 AND unified_artist_id = ?2), 0),
                updated_at = ?3
             WHERE user_id = ?1 AND unified_artist_id = ?2",
            params![event.user_id, event.unified_artist_id, now],
        )?;
        tx.commit()?;
        Ok(EventInsertOutcome::Inserted)
    }

    fn get_cursor(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let cursor: Option<i64> = conn
            .query_row(
                "SELECT last_ingested_played_at FROM ingestion_cursor WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor.map(from_millis))
    }

    fn advance_cursor(&self, user_id: &str, played_at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ingestion_cursor (user_id, last_ingested_played_at, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                last_ingested_played_at = MAX(last_ingested_played_at, excluded.last_ingested_played_at),
                updated_at = excluded.updated_at",
            params![user_id, to_millis(played_at), now_millis()],
        )?;
        let cursor: i64 = conn.query_row(
            "SELECT last_ingested_played_at FROM ingestion_cursor WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(from_millis(cursor))
    }

    fn add_engagement(
        &self,
        user_id: &str,
        artist_id: &str,
        region: &str,
        delta: &EngagementDelta,
    ) -> Result<ListenerStats> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO listener_stats (user_id, unified_artist_id, region, album_saves,
                track_likes, playlist_adds, updated_at)
             VALUES (?1, ?2, ?3, MAX(?4, 0), MAX(?5, 0), MAX(?6, 0), ?7)
             ON CONFLICT(user_id, unified_artist_id, region) DO UPDATE SET
                album_saves = MAX(album_saves + ?4, 0),
                track_likes = MAX(track_likes + ?5, 0),
                playlist_adds = MAX(playlist_adds + ?6, 0),
                updated_at = excluded.updated_at",
            params![
                user_id,
                artist_id,
                region,
                delta.album_saves,
                delta.track_likes,
                delta.playlist_adds,
                now_millis()
            ],
        )?;
        let stats = select_stats(&tx, user_id, artist_id, region)?
            .context("Stats row missing right after upsert")?;
        tx.commit()?;
        Ok(stats)
    }

    fn get_stats(
        &self,
        user_id: &str,
        artist_id: &str,
        region: &str,
    ) -> Result<Option<ListenerStats>> {
        let conn = self.conn.lock().unwrap();
        Ok(select_stats(&conn, user_id, artist_id, region)?)
    }

    fn get_cohort_stats(&self, artist_id: &str, region: &str) -> Result<Vec<ListenerStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM listener_stats WHERE unified_artist_id = ?1 AND region = ?2 ORDER BY user_id",
            STATS_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![artist_id, region], row_to_stats)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn get_cohort_maxima(&self, artist_id: &str, region: &str) -> Result<CohortMaxima> {
        let conn = self.conn.lock().unwrap();
        let maxima = conn.query_row(
            &format!(
                "SELECT COALESCE(MAX(play_count), 0), COALESCE(MAX(total_ms_played), 0),
                    COALESCE(MAX({} * album_saves + {} * track_likes + {} * playlist_adds), 0)
                 FROM listener_stats WHERE unified_artist_id = ?1 AND region = ?2",
                ALBUM_SAVE_WEIGHT, TRACK_LIKE_WEIGHT, PLAYLIST_ADD_WEIGHT
            ),
            params![artist_id, region],
            |row| {
                Ok(CohortMaxima {
                    max_play_count: row.get(0)?,
                    max_total_ms: row.get(1)?,
                    max_engagement_raw: row.get::<_, i64>(2)? as f64,
                })
            },
        )?;
        Ok(maxima)
    }

    fn update_score(
        &self,
        user_id: &str,
        artist_id: &str,
        region: &str,
        listener_score: f64,
        engagement_score: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE listener_stats SET listener_score = ?4, engagement_score = ?5, score_updated_at = ?6
             WHERE user_id = ?1 AND unified_artist_id = ?2 AND region = ?3",
            params![
                user_id,
                artist_id,
                region,
                listener_score,
                engagement_score,
                to_millis(updated_at)
            ],
        )?;
        Ok(())
    }

    fn get_dirty_cohorts(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        select_cohorts(
            &conn,
            "SELECT DISTINCT unified_artist_id, region FROM listener_stats
             WHERE score_updated_at IS NULL OR score_updated_at < updated_at
             ORDER BY unified_artist_id, region",
        )
    }

    fn get_all_cohorts(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        select_cohorts(
            &conn,
            "SELECT DISTINCT unified_artist_id, region FROM listener_stats ORDER BY unified_artist_id, region",
        )
    }

    fn get_score_config(&self) -> Result<ScoreConfig> {
        let conn = self.conn.lock().unwrap();
        let config = conn
            .query_row(
                "SELECT stream_weight, duration_weight, completion_weight, recency_weight,
                    engagement_weight, fan_spread_weight, recency_decay_lambda,
                    low_completion_threshold, low_completion_penalty
                 FROM score_config WHERE id = 1",
                [],
                |row| {
                    Ok(ScoreConfig {
                        stream_weight: row.get(0)?,
                        duration_weight: row.get(1)?,
                        completion_weight: row.get(2)?,
                        recency_weight: row.get(3)?,
                        engagement_weight: row.get(4)?,
                        fan_spread_weight: row.get(5)?,
                        recency_decay_lambda: row.get(6)?,
                        low_completion_threshold: row.get(7)?,
                        low_completion_penalty: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(config.unwrap_or_default())
    }

    fn set_score_config(&self, config: &ScoreConfig) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO score_config (id, stream_weight, duration_weight, completion_weight,
                recency_weight, engagement_weight, fan_spread_weight, recency_decay_lambda,
                low_completion_threshold, low_completion_penalty, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                stream_weight = excluded.stream_weight,
                duration_weight = excluded.duration_weight,
                completion_weight = excluded.completion_weight,
                recency_weight = excluded.recency_weight,
                engagement_weight = excluded.engagement_weight,
                fan_spread_weight = excluded.fan_spread_weight,
                recency_decay_lambda = excluded.recency_decay_lambda,
                low_completion_threshold = excluded.low_completion_threshold,
                low_completion_penalty = excluded.low_completion_penalty,
                updated_at = excluded.updated_at",
            params![
                config.stream_weight,
                config.duration_weight,
                config.completion_weight,
                config.recency_weight,
                config.engagement_weight,
                config.fan_spread_weight,
                config.recency_decay_lambda,
                config.low_completion_threshold,
                config.low_completion_penalty,
                now_millis(),
            ],
        )?;
        Ok(())
    }

    fn rebuild_leaderboard(
        &self,
        artist_id: &str,
        region: &str,
        capacity: usize,
        cached_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM leaderboard_cache_entry WHERE artist_id = ?1 AND region = ?2",
            params![artist_id, region],
        )?;

        let top: Vec<(String, f64)> = {
            let mut stmt = tx.prepare(
                "SELECT user_id, listener_score FROM listener_stats
                 WHERE unified_artist_id = ?1 AND region = ?2
                 ORDER BY listener_score DESC, COALESCE(last_played_at, ?3) ASC, user_id ASC
                 LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(
                    params![artist_id, region, NEVER_PLAYED, capacity as i64],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        {
            let mut insert = tx.prepare(
                "INSERT INTO leaderboard_cache_entry (artist_id, region, user_id, listener_score, rank, cached_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (index, (user_id, score)) in top.iter().enumerate() {
                insert.execute(params![
                    artist_id,
                    region,
                    user_id,
                    score,
                    (index + 1) as i64,
                    to_millis(cached_at)
                ])?;
            }
        }
        tx.commit()?;
        Ok(top.len())
    }

    fn get_leaderboard(&self, artist_id: &str, region: &str) -> Result<Vec<LeaderboardCacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.artist_id, c.region, c.user_id, c.listener_score, c.rank, c.cached_at, s.last_played_at
             FROM leaderboard_cache_entry c
             LEFT JOIN listener_stats s
                ON s.user_id = c.user_id AND s.unified_artist_id = c.artist_id AND s.region = c.region
             WHERE c.artist_id = ?1 AND c.region = ?2
             ORDER BY c.rank",
        )?;
        let entries = stmt
            .query_map(params![artist_id, region], |row| {
                Ok(LeaderboardCacheEntry {
                    artist_id: row.get(0)?,
                    region: row.get(1)?,
                    user_id: row.get(2)?,
                    listener_score: row.get(3)?,
                    rank: row.get(4)?,
                    cached_at: from_millis(row.get(5)?),
                    last_played_at: row.get::<_, Option<i64>>(6)?.map(from_millis),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn get_live_rank(&self, user_id: &str, artist_id: &str, region: &str) -> Result<Option<u32>> {
        let conn = self.conn.lock().unwrap();
        let own: Option<(f64, i64)> = conn
            .query_row(
                "SELECT listener_score, COALESCE(last_played_at, ?4) FROM listener_stats
                 WHERE user_id = ?1 AND unified_artist_id = ?2 AND region = ?3",
                params![user_id, artist_id, region, NEVER_PLAYED],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((score, last_played)) = own else {
            return Ok(None);
        };

        let ahead: i64 = conn.query_row(
            "SELECT COUNT(*) FROM listener_stats
             WHERE unified_artist_id = ?1 AND region = ?2 AND (
                listener_score > ?3
                OR (listener_score = ?3 AND COALESCE(last_played_at, ?6) < ?4)
                OR (listener_score = ?3 AND COALESCE(last_played_at, ?6) = ?4 AND user_id < ?5))",
            params![artist_id, region, score, last_played, user_id, NEVER_PLAYED],
            |row| row.get(0),
        )?;
        Ok(Some(ahead as u32 + 1))
    }

    fn erase_user(&self, user_id: &str) -> Result<ErasureSummary> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let affected_cohorts = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT unified_artist_id, region FROM listener_stats WHERE user_id = ?1
                 ORDER BY unified_artist_id, region",
            )?;
            let cohorts = stmt
                .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
            cohorts
        };

        let play_events = tx.execute("DELETE FROM play_event WHERE user_id = ?1", params![user_id])?;
        let listener_stats =
            tx.execute("DELETE FROM listener_stats WHERE user_id = ?1", params![user_id])?;
        let leaderboard_entries = tx.execute(
            "DELETE FROM leaderboard_cache_entry WHERE user_id = ?1",
            params![user_id],
        )?;
        tx.execute("DELETE FROM ingestion_cursor WHERE user_id = ?1", params![user_id])?;
        tx.execute("DELETE FROM platform_connection WHERE user_id = ?1", params![user_id])?;
        tx.commit()?;

        Ok(ErasureSummary {
            play_events,
            listener_stats,
            leaderboard_entries,
            affected_cohorts,
        })
    }

    fn get_store_stats(&self) -> Result<ListeningStoreStats> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
            Ok(n as usize)
        };
        Ok(ListeningStoreStats {
            artists: count("unified_artist")?,
            play_events: count("play_event")?,
            listener_stats: count("listener_stats")?,
        })
    }
}
