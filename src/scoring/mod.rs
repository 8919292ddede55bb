//! Listener score calculation.
//!
//! Six indices, each normalized against the artist+region cohort, are
//! weighted by the persisted [`ScoreConfig`](crate::listening_store::ScoreConfig)
//! into a score in `[0, 100]`.

mod breakdown;
mod calculator;

pub use breakdown::{
    compute_breakdown, days_since, IndexSet, RawScoreInputs, ScoreBreakdown, MAX_SCORE,
    NEVER_PLAYED_DAYS,
};
pub use calculator::{validate_score_config, CohortRecalculation, ScoreCalculator, ScoreError};
