// NYC Yellow Taxi Import/Clean Pipeline
//
// Streams TLC Parquet trip files into two sinks:
// - PostgreSQL keeps the raw rows, with a per-file import ledger that makes
//   reruns idempotent and crashes resumable.
// - MongoDB serves a cleaned copy, rebuilt in a staging collection and
//   swapped in atomically so readers never see a partial dataset.
//
// Module layout follows the usual ingestion split:
// - reader:   chunked Parquet decoding (bounded memory)
// - cleaner:  pure per-batch validation and normalization
// - importer: raw load into PostgreSQL + import ledger
// - replacer: clean load into MongoDB staging + atomic rename
// - pipeline: sequencing and best-effort error aggregation

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cleaner;
pub mod config;
pub mod importer;
pub mod models;
pub mod pipeline;
pub mod reader;
pub mod replacer;

// Re-export main types
pub use cleaner::{clean_batch, CleanerConfig};
pub use config::Config;
pub use importer::{FileOutcome, ImportReport, PostgresImporter};
pub use models::{ChunkResult, CleanTrip, PipelineTotals, RawTrip};
pub use pipeline::{PipelineReport, TaxiPipeline};
pub use reader::{list_parquet_files, TripChunkReader};
pub use replacer::DocumentReplacer;

/// Rows per chunk when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Raw trips table in PostgreSQL.
pub const TRIPS_TABLE: &str = "yellow_taxi_trips";

/// Per-file import ledger table in PostgreSQL.
pub const LEDGER_TABLE: &str = "import_log";

/// Collection served to readers.
pub const LIVE_COLLECTION: &str = "cleaned_trips";

/// Collection the replacer builds into before the swap.
pub const STAGING_COLLECTION: &str = "cleaned_trips_staging";

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error types for the pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("source read error for {path}: {message}")]
    SourceRead { path: String, message: String },

    #[error("sink write error: {0}")]
    SinkWrite(String),

    #[error("concurrent import detected for {0}")]
    LedgerConflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("document store error: {0}")]
    DocumentStore(#[from] mongodb::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Attach a path to a Parquet or Arrow error.
    pub(crate) fn source_read(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        PipelineError::SourceRead {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}
