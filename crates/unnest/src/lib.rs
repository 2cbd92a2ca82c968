//! Flatten deeply nested JSON records into flat relational tables and export
//! them to CSV, Parquet, or Avro.
//!
//! From each input record the flattener produces one row for the main table
//! (columns named by the dotted path through the nested tree) plus zero or
//! more child tables extracted from arrays of sub-objects, linked to their
//! parent rows by generated identifiers.
//!
//! [`flatten`] materializes the tables in memory as a [`FlattenResult`];
//! [`flatten_stream`] drives records straight into a format writer with
//! bounded memory.

mod batch;
mod config;
mod error;
mod flatten;
mod input;
mod pipeline;
mod writer;

pub use batch::{FlatRow, FlushGroup};
pub use config::{ArrayMode, FlattenConfig, IdStrategy, NaturalId, SchemaDrift};
pub use error::{ErrorKind, FlattenError};
pub use input::{Input, Records};
pub use writer::{
    AvroCodec, AvroOptions, Compression, CsvOptions, OrcOptions, OutputFormat, ParquetOptions,
    Writer,
};

use crate::batch::Tables;
use crate::flatten::Flattener;
use std::path::{Path, PathBuf};

/// Flatten `input` into an in-memory result.
///
/// `name` is the entity name: it names the main table and prefixes every
/// derived child-table name.
#[tracing::instrument(level = "debug", skip(input, config))]
pub fn flatten(
    input: Input,
    name: &str,
    config: &FlattenConfig,
) -> Result<FlattenResult, FlattenError> {
    config.validate()?;
    let mut flattener = Flattener::new(name, config)?;
    let mut tables = Tables::new();
    let mut record_count = 0u64;

    for record in input.into_records()? {
        flattener.flatten_record(record?, &mut tables)?;
        record_count += 1;
    }
    tracing::debug!(record_count, tables = tables.len(), "flattened input in memory");

    Ok(FlattenResult {
        entity: name.to_string(),
        truncated: flattener.truncated(),
        drift: config.schema_drift,
        batch_size: config.batch_size.unwrap_or(config::MEMORY_BATCH_SIZE),
        tables,
    })
}

/// Flatten `input` directly into format files under `output`, in bounded
/// memory.
///
/// A destination carrying a file extension receives the main table at that
/// exact path and any child tables in the extension-stripped sibling
/// directory; a bare destination is a directory holding every table.
#[tracing::instrument(level = "debug", skip(input, config))]
pub fn flatten_stream(
    input: Input,
    output: &Path,
    name: &str,
    format: &OutputFormat,
    config: &FlattenConfig,
) -> Result<(), FlattenError> {
    config.validate()?;
    let records = input.into_records()?;
    let layout = writer::Layout::for_path(output, name, format.extension());
    let mut writer = writer::new_writer(format, layout, config.schema_drift)?;
    let batch_size = config.batch_size.unwrap_or(config::STREAM_BATCH_SIZE);
    pipeline::run(records, name, config, batch_size, writer.as_mut())
}

/// In-memory flatten result: the main table plus extracted child tables.
#[derive(Debug)]
pub struct FlattenResult {
    entity: String,
    tables: Tables,
    truncated: u64,
    drift: SchemaDrift,
    batch_size: usize,
}

impl FlattenResult {
    /// The main-table name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Rows of the main table.
    pub fn main(&self) -> &[FlatRow] {
        self.tables.get(&self.entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rows of any table by name.
    pub fn table(&self, name: &str) -> Option<&[FlatRow]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    /// All tables in extraction order, main table first.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &[FlatRow])> + '_ {
        self.tables
            .iter()
            .map(|(name, rows)| (name.as_str(), rows.as_slice()))
    }

    /// Child tables in extraction order.
    pub fn child_tables(&self) -> impl Iterator<Item = (&str, &[FlatRow])> + '_ {
        self.tables().filter(move |(name, _)| *name != self.entity)
    }

    /// Total row count across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    /// Number of subtrees dropped by the depth guard.
    pub fn truncated(&self) -> u64 {
        self.truncated
    }

    /// Write every table with the given format.
    ///
    /// With only a main table and a destination carrying a file extension,
    /// one file is written at that path. With child tables present the
    /// destination (extension stripped, if any) becomes a directory of
    /// `<table>.<extension>` files.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = %self.entity))]
    pub fn save(&self, path: &Path, format: &OutputFormat) -> Result<(), FlattenError> {
        let has_children = self.tables.len() > 1;
        let layout = if has_children {
            writer::Layout::directory(&strip_extension(path), &self.entity, format.extension())
        } else {
            writer::Layout::for_path(path, &self.entity, format.extension())
        };
        let mut writer = writer::new_writer(format, layout, self.drift)?;

        // Tables are appended in order, so every main-table batch reaches the
        // writer before the first child row.
        for (name, rows) in self.tables.iter() {
            for chunk in rows.chunks(self.batch_size) {
                let mut tables = Tables::new();
                tables.insert(name.clone(), chunk.to_vec());
                writer.append(FlushGroup::new(tables))?;
            }
        }
        writer.finalize()
    }
}

fn strip_extension(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.with_extension("")
    } else {
        path.to_path_buf()
    }
}
