//! Listener Score Server Library
//!
//! Cross-platform listening ingestion, per-artist listener scores and
//! leaderboards. The modules are exposed for the binary and for the
//! end-to-end tests.

pub mod background_jobs;
pub mod config;
pub mod identity;
pub mod ingestion;
pub mod leaderboard;
pub mod listening_store;
pub mod scoring;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use listening_store::{ListeningStore, SqliteListeningStore};
pub use server::{run_server, RequestsLoggingLevel};
