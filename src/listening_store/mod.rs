//! Persistence for artist identities, play events, aggregate stats and
//! the leaderboard cache.

mod models;
mod schema;
mod store;
#[cfg(test)]
pub(crate) mod test_support;
mod trait_def;

pub use models::*;
pub use store::{event_key, SqliteListeningStore};
pub use trait_def::ListeningStore;
