//! Shared constants for end-to-end tests
//!
//! When test data changes (user ids, artist ids, tokens),
//! update only this file.

// ============================================================================
// Test Callers
// ============================================================================

pub const USER_1: &str = "user-1";
pub const USER_2: &str = "user-2";
pub const USER_3: &str = "user-3";

/// Token the test server expects in the X-Admin-Token header
pub const ADMIN_TOKEN: &str = "test-admin-token";

// ============================================================================
// Test Catalog IDs
// ============================================================================

/// Spotify id of "The Test Band", also its unified id
pub const SPOTIFY_ARTIST_ID: &str = "spotify-artist-1";

/// Apple Music id of "The Test Band"
pub const APPLE_ARTIST_ID: &str = "apple-artist-1";

pub const ARTIST_NAME: &str = "The Test Band";

/// ISRC shared by the same recording on both platforms
pub const SHARED_ISRC: &str = "USRC17607839";

/// Spotify id of "Jazz Ensemble"
pub const OTHER_ARTIST_ID: &str = "spotify-artist-2";

pub const OTHER_ARTIST_NAME: &str = "Jazz Ensemble";

// ============================================================================
// Timeouts
// ============================================================================

pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How long tests wait for a triggered background job to finish
pub const JOB_COMPLETION_TIMEOUT_MS: u64 = 5000;
