//! Error taxonomy for the calibration pipeline.
//!
//! Kinds map onto the propagation policy table: configuration errors fail
//! fast at construction time, ingestion/scoring errors are caught per-record
//! by the orchestrator, storage errors propagate, and insufficient-sample
//! conditions are the two hard-fail exits of a batch run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("ingestion error: {0}")]
    Ingestion(String),

    #[error("scoring error: {0}")]
    Scoring(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("{0}")]
    InsufficientSamples(String),

    #[error("malformed record at {path}:{line}: {source}")]
    MalformedLine {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
