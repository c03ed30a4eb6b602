//! Error handling for the preprocessing pipeline.
//!
//! Every failure is fatal: stages propagate a [`PipelineError`] and the run
//! aborts before anything is written.

pub mod util;

use std::io;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

/// Specialized error type for the pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The input directory or file list is empty
    #[error("No input: {0}")]
    InputAbsent(String),

    /// No loaded table has a column matching the selection needle
    #[error("No table contains a column matching '{needle}'")]
    NoMatchingTable {
        /// Substring that was searched for in column names
        needle: String,
    },

    /// A date string did not match the expected format
    #[error("Cannot parse '{value}' in column '{column}' with format '{format}'")]
    Parse {
        /// Column being parsed
        column: String,
        /// Offending raw value
        value: String,
        /// Expected chrono format
        format: String,
    },

    /// A value could not be cast to a numeric type
    #[error("Cannot cast '{value}' in column '{column}' to a number")]
    TypeCast {
        /// Column being cast
        column: String,
        /// Offending raw value
        value: String,
    },

    /// Missing or mistyped column, or a join key mismatch
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error opening, reading or writing a file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error from an Arrow kernel or the CSV reader
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Error reading or writing Parquet data
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    /// Error parsing a JSON configuration file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error converting typed rows to or from record batches
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_arrow::Error),
}

impl PipelineError {
    /// Error for a required column that is absent from a table
    #[must_use]
    pub fn missing_column(column: &str, table: &str) -> Self {
        Self::Schema(format!("column '{column}' not found in table '{table}'"))
    }

    /// Error for a column whose Arrow type cannot be used
    #[must_use]
    pub fn invalid_type(column: &str, expected: &str) -> Self {
        Self::Schema(format!("column '{column}' is not of type {expected}"))
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
