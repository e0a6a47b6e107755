// Fatal error taxonomy for the pipeline.
// Row-level problems never appear here - they go to the quarantine sink.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// An expected column is entirely absent from a source table.
    /// Aborts the run before any artifact is touched.
    #[error("table `{table}` is missing expected column `{column}`")]
    StructuralSchema { table: String, column: String },

    /// Quarantine accumulation crossed the configured maximum ratio
    #[error(
        "quarantined {quarantined} of {total} input rows ({ratio:.1}%), maximum allowed is {max:.1}%"
    )]
    ThresholdExceeded {
        quarantined: usize,
        total: usize,
        ratio: f64,
        max: f64,
    },

    /// The changelog could not be written; aborts before artifact replacement
    #[error("changelog write failed: {0}")]
    ChangelogWrite(String),

    #[error("source database error: {0}")]
    Source(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
