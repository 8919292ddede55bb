//! Play event ingestion.
//!
//! Raw events from the platform sync clients are validated, resolved to a
//! unified artist and appended to the play log; the per-artist aggregates
//! are updated in the same transaction as the append.

mod ingestor;
mod models;

pub use ingestor::{IngestionError, IngestorConfig, PlayEventIngestor};
pub use models::{
    EventErrorDetail, EventValidationError, IngestReport, IngestRequest, RawPlayEvent,
    ValidatedEvent, DEFAULT_DURATION_MS, DEFAULT_REGION,
};
