//! Error types for the scheduling core.
//!
//! Per-op failures (no workplace, no capacity, blocked by precedence) are not
//! modelled here: they are data, reported via `unplaced.csv` (see
//! [`crate::dispatch`]). `CoreError` is reserved for infrastructure-level
//! faults that abort a run before any output is produced.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("missing required input file: {0}")]
    MissingInput(PathBuf),

    #[error("malformed input in {path}: {reason}")]
    MalformedInput { path: PathBuf, reason: String },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("scenario '{0}' already has a run in progress")]
    ScenarioBusy(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
