//! Format writers: schema-locking sinks that consume flush groups.

pub mod avro;
pub mod csv;
pub mod parquet;

use crate::batch::{FlatRow, FlushGroup};
use crate::config::SchemaDrift;
use crate::error::FlattenError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A single-consumer sink for flush groups. [`new_writer`] is the open
/// operation; `finalize` closes every per-table file.
pub trait Writer {
    /// Append one flush group. Each table locks its schema on its first
    /// non-empty batch.
    fn append(&mut self, group: FlushGroup) -> Result<(), FlattenError>;

    /// Flush buffered rows and close all files. The writer accepts no
    /// further appends.
    fn finalize(&mut self) -> Result<(), FlattenError>;
}

/// Output format selection, carrying the per-format options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum OutputFormat {
    #[serde(rename = "csv")]
    Csv(CsvOptions),

    #[serde(rename = "parquet")]
    Parquet(ParquetOptions),

    /// Recognized but backed by no library in this build; opening an ORC
    /// writer fails with a dependency error.
    #[serde(rename = "orc")]
    Orc(OrcOptions),

    #[serde(rename = "avro")]
    Avro(AvroOptions),
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl OutputFormat {
    /// File extension for per-table output files.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv(_) => "csv",
            OutputFormat::Parquet(_) => "parquet",
            OutputFormat::Orc(_) => "orc",
            OutputFormat::Avro(_) => "avro",
        }
    }
}

/// Options for the CSV writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CsvOptions {
    /// Field delimiter. Must be ASCII.
    pub delimiter: char,
    /// Quote character. Must be ASCII.
    pub quote: char,
    /// Write a header row when each table's schema locks.
    pub headers: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            delimiter: ',',
            quote: '"',
            headers: true,
        }
    }
}

/// Compression codecs for the Parquet writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Compression {
    None,
    #[default]
    Snappy,
    Gzip,
    Zstd,
}

/// Options for the Parquet writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ParquetOptions {
    /// Compression codec applied to every column.
    pub compression: Compression,
    /// Maximum rows per row group.
    pub row_group_size: usize,
}

impl Default for ParquetOptions {
    fn default() -> Self {
        ParquetOptions {
            compression: Compression::Snappy,
            row_group_size: 1024 * 1024,
        }
    }
}

/// Options reserved for the ORC writer. No library in this build backs the
/// format, so every option-bearing open fails with a dependency error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OrcOptions {}

/// Avro object-container codecs compiled into this build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum AvroCodec {
    Null,
    Deflate,
    #[default]
    Snappy,
}

/// Options for the Avro writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct AvroOptions {
    /// Block compression codec.
    pub codec: AvroCodec,
}

/// The open operation: resolve a writer for `format`, probing backend and
/// codec availability before any append.
pub(crate) fn new_writer(
    format: &OutputFormat,
    layout: Layout,
    drift: SchemaDrift,
) -> Result<Box<dyn Writer>, FlattenError> {
    match format {
        OutputFormat::Csv(options) => Ok(Box::new(csv::CsvWriter::open(
            layout,
            options.clone(),
            drift,
        )?)),
        OutputFormat::Parquet(options) => {
            Ok(Box::new(parquet::ParquetWriter::open(layout, options.clone())?))
        }
        OutputFormat::Orc(_) => Err(FlattenError::MissingBackend("orc")),
        OutputFormat::Avro(options) => Ok(Box::new(avro::AvroWriter::open(layout, options.clone())?)),
    }
}

/// Maps table names to output file paths.
///
/// A destination carrying a file extension sends the main table to that exact
/// file; every other table lands in the extension-stripped directory as
/// `<table>.<ext>`. A bare destination is a directory for all tables.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    entity: String,
    extension: &'static str,
    main_file: Option<PathBuf>,
    dir: PathBuf,
}

impl Layout {
    /// Layout for a destination that may name a single file.
    pub fn for_path(path: &Path, entity: &str, extension: &'static str) -> Layout {
        if path.extension().is_some() {
            Layout {
                entity: entity.to_string(),
                extension,
                main_file: Some(path.to_path_buf()),
                dir: path.with_extension(""),
            }
        } else {
            Layout::directory(path, entity, extension)
        }
    }

    /// Layout writing every table into `dir`.
    pub fn directory(dir: &Path, entity: &str, extension: &'static str) -> Layout {
        Layout {
            entity: entity.to_string(),
            extension,
            main_file: None,
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, table: &str) -> PathBuf {
        match &self.main_file {
            Some(file) if table == self.entity => file.clone(),
            _ => self.dir.join(format!("{}.{}", table, self.extension)),
        }
    }

    /// Create the output file for `table`, creating parent directories on
    /// first use.
    pub fn create(&self, table: &str) -> Result<fs::File, FlattenError> {
        let path = self.path_for(table);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(fs::File::create(&path)?)
    }
}

/// Writer lifecycle guard shared by the format writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriterState {
    Open,
    Finalized,
    Failed,
}

impl WriterState {
    pub fn check_open(self) -> Result<(), FlattenError> {
        match self {
            WriterState::Open => Ok(()),
            WriterState::Finalized => Err(FlattenError::Finalized),
            WriterState::Failed => Err(FlattenError::Failed),
        }
    }
}

/// Scalar families observed in cells, used by the columnar writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScalarKind {
    Boolean,
    Long,
    Double,
    Text,
}

impl ScalarKind {
    /// The family of one cell value, or `None` for nulls.
    pub fn of(value: &Value) -> Option<ScalarKind> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ScalarKind::Boolean),
            Value::Number(n) if n.is_f64() => Some(ScalarKind::Double),
            Value::Number(_) => Some(ScalarKind::Long),
            _ => Some(ScalarKind::Text),
        }
    }
}

/// Union of row keys across the locking batch, in first-appearance order.
pub(crate) fn locked_columns(rows: &[FlatRow]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Columns present in `rows` that the lock predicate does not know.
pub(crate) fn drifted<'r>(
    is_locked: impl Fn(&str) -> bool,
    rows: &'r [FlatRow],
) -> Vec<&'r str> {
    let mut unseen: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !is_locked(key) && !unseen.contains(&key.as_str()) {
                unseen.push(key);
            }
        }
    }
    unseen
}
