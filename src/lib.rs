// Subscriber ETL - Core Library
// Batch pipeline: validate the raw snapshot, clean and join it into one
// aggregated table, quarantine what cannot be resolved, and append a
// versioned changelog entry.

pub mod aggregate;
pub mod changelog;
pub mod cleaner;
pub mod error;
pub mod pipeline;
pub mod quarantine;
pub mod schema;
pub mod source;
pub mod store;

// Re-export commonly used types
pub use aggregate::{AggregatedRecord, Aggregator};
pub use changelog::{ChangelogEntry, ChangelogWriter, DiffSummary};
pub use cleaner::{CleanCourse, CleanJob, CleanSubscriber, RecordCleaner, UNKNOWN};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineConfig, RunFailure, RunOutcome, RunReport, RunStage};
pub use quarantine::{QuarantineReason, QuarantineSink, QuarantinedRecord};
pub use schema::{ColumnSpec, ColumnType, SchemaValidator, TableSchema, ValidationOutcome};
pub use source::{read_snapshot, RawRecord, RawTable, Snapshot, SourceTable};
pub use store::ArtifactStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
