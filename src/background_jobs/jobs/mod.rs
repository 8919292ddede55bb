//! Specific background job implementations.

pub mod score_refresh;

pub use score_refresh::{ScoreRefreshJob, SCORE_REFRESH_JOB_ID};
