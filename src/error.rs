//! Error handling for folio
//!
//! Defines the terminal ingestion failure taxonomy and establishes a unified
//! Result type using anyhow for context chaining and error propagation.
//!
//! Row-level problems (unparseable date, non-ticker symbol, disclaimer text)
//! are never errors: those rows are skipped and counted by the importers.

use thiserror::Error;

/// Terminal failures for a single upload. The cause is data shape, not a
/// transient condition, so there is no retry inside the library; callers
/// surface the diagnostics and a human re-uploads or maps columns.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("empty file")]
    EmptyFile,

    #[error("unsupported file format: {0} (expected .csv/.tsv/.txt or .xlsx/.xlsm)")]
    UnsupportedFormat(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("schema detection failed: {reason}; attempted {attempted:?}; columns {columns:?}")]
    SchemaDetection {
        reason: String,
        /// canonical field -> chosen column (or "(none)"), for operator diagnosis
        attempted: Vec<(String, String)>,
        columns: Vec<String>,
    },

    #[error("no positions parsed: zero rows survived filtering; columns {columns:?}")]
    NoPositionsParsed { columns: Vec<String> },
}

/// Result type alias for folio operations
pub type Result<T> = anyhow::Result<T>;
