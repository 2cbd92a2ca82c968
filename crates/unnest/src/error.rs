//! Error type shared by flattening and export operations.

use std::io;
use std::path::PathBuf;

/// The failure family a [`FlattenError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input, the configuration, or an id lookup was invalid.
    Validation,
    /// The flattener failed while processing a record.
    Processing,
    /// A writer failed: I/O, schema lock, or schema drift.
    Output,
    /// A requested output backend or codec is not part of this build.
    Dependency,
}

/// Error type returned by all flatten and export operations.
#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    #[error("expected a JSON object at the top level of each record, got {0}")]
    RecordNotObject(&'static str),

    #[error("id field {field:?} of table {table:?} is missing or null")]
    MissingNaturalId { table: String, field: String },

    #[error("no natural id field is configured for table {0:?}")]
    UnmappedNaturalId(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "unable to determine the input format of {0:?}: expected a .json, .jsonl, or .ndjson extension"
    )]
    CannotInferFormat(PathBuf),

    #[error("failed to read input {path:?}: {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error(
        "schema drift in table {table:?}: column {column:?} was not present when the schema was locked"
    )]
    SchemaDrift { table: String, column: String },

    #[error("column {column:?} of table {table:?} is {expected} and cannot hold {value}")]
    ColumnType {
        table: String,
        column: String,
        expected: &'static str,
        value: String,
    },

    #[error("writer is already finalized")]
    Finalized,

    #[error("writer previously failed and can no longer be used")]
    Failed,

    #[error("the {0} output backend is not available in this build")]
    MissingBackend(&'static str),

    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),

    #[error("csv writer: {0}")]
    Csv(#[from] csv::Error),

    #[error("arrow conversion: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet writer: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("avro writer: {0}")]
    Avro(#[from] apache_avro::Error),
}

impl FlattenError {
    /// Classify this error into the taxonomy exposed to callers.
    pub fn kind(&self) -> ErrorKind {
        use FlattenError::*;
        match self {
            RecordNotObject(_)
            | MissingNaturalId { .. }
            | UnmappedNaturalId(_)
            | InvalidConfig(_)
            | CannotInferFormat(_)
            | ReadInput { .. }
            | Json(_) => ErrorKind::Validation,
            Timestamp(_) => ErrorKind::Processing,
            SchemaDrift { .. }
            | ColumnType { .. }
            | Finalized
            | Failed
            | Io(_)
            | Csv(_)
            | Arrow(_)
            | Parquet(_)
            | Avro(_) => ErrorKind::Output,
            MissingBackend(_) => ErrorKind::Dependency,
        }
    }
}
