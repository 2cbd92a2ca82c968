//! Columnar Parquet sink: each flush batch becomes an Arrow record batch
//! written through `parquet::arrow::ArrowWriter`.
//!
//! The underlying writer fixes its Arrow schema when the file is created, so
//! a table's schema locks on its first non-empty batch and later unseen
//! columns are reported as schema drift.

use super::{drifted, Compression, Layout, ParquetOptions, ScalarKind, Writer, WriterState};
use crate::batch::{FlatRow, FlushGroup};
use crate::error::FlattenError;
use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use std::fs;
use std::sync::Arc;

pub(crate) struct ParquetWriter {
    layout: Layout,
    options: ParquetOptions,
    tables: IndexMap<String, ParquetTable>,
    state: WriterState,
}

struct ParquetTable {
    columns: Vec<(String, ScalarKind)>,
    schema: SchemaRef,
    writer: ArrowWriter<fs::File>,
}

impl ParquetWriter {
    pub fn open(layout: Layout, options: ParquetOptions) -> Result<ParquetWriter, FlattenError> {
        Ok(ParquetWriter {
            layout,
            options,
            tables: IndexMap::new(),
            state: WriterState::Open,
        })
    }

    fn properties(&self) -> WriterProperties {
        let compression = match self.options.compression {
            Compression::None => ParquetCompression::UNCOMPRESSED,
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Gzip => ParquetCompression::GZIP(GzipLevel::default()),
            Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
        };
        WriterProperties::builder()
            .set_compression(compression)
            .set_max_row_group_size(self.options.row_group_size)
            .build()
    }

    fn append_inner(&mut self, group: FlushGroup) -> Result<(), FlattenError> {
        for (name, rows) in group.tables() {
            if rows.is_empty() {
                continue;
            }
            if !self.tables.contains_key(name) {
                let columns = infer_columns(rows);
                let fields: Vec<Field> = columns
                    .iter()
                    .map(|(column, kind)| Field::new(column, kind.data_type(), true))
                    .collect();
                let schema: SchemaRef = Arc::new(Schema::new(fields));
                let file = self.layout.create(name)?;
                let writer = ArrowWriter::try_new(file, schema.clone(), Some(self.properties()))?;
                tracing::debug!(table = name, columns = columns.len(), "locked parquet schema");
                self.tables.insert(
                    name.to_string(),
                    ParquetTable {
                        columns,
                        schema,
                        writer,
                    },
                );
            }
            let Some(table) = self.tables.get_mut(name) else {
                continue;
            };

            if let Some(column) = drifted(
                |c| table.columns.iter().any(|(l, _)| l == c),
                rows,
            )
            .first()
            {
                return Err(FlattenError::SchemaDrift {
                    table: name.to_string(),
                    column: column.to_string(),
                });
            }

            let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns.len());
            for (column, kind) in &table.columns {
                arrays.push(build_column(name, column, *kind, rows)?);
            }
            let batch = RecordBatch::try_new(table.schema.clone(), arrays)?;
            table.writer.write(&batch)?;
        }
        Ok(())
    }

    fn finalize_inner(&mut self) -> Result<(), FlattenError> {
        for (name, table) in std::mem::take(&mut self.tables) {
            table.writer.close()?;
            tracing::debug!(table = %name, "closed parquet file");
        }
        Ok(())
    }
}

impl Writer for ParquetWriter {
    fn append(&mut self, group: FlushGroup) -> Result<(), FlattenError> {
        self.state.check_open()?;
        self.append_inner(group).map_err(|error| {
            self.state = WriterState::Failed;
            error
        })
    }

    fn finalize(&mut self) -> Result<(), FlattenError> {
        self.state.check_open()?;
        self.finalize_inner().map_err(|error| {
            self.state = WriterState::Failed;
            error
        })?;
        self.state = WriterState::Finalized;
        Ok(())
    }
}

impl ScalarKind {
    fn data_type(self) -> DataType {
        match self {
            ScalarKind::Boolean => DataType::Boolean,
            ScalarKind::Long => DataType::Int64,
            ScalarKind::Double => DataType::Float64,
            ScalarKind::Text => DataType::Utf8,
        }
    }

    /// Widen to a type that can hold both operands: integers and floats meet
    /// at Float64, everything else meets at Utf8.
    fn merge(self, other: ScalarKind) -> ScalarKind {
        match (self, other) {
            (a, b) if a == b => a,
            (ScalarKind::Long, ScalarKind::Double) | (ScalarKind::Double, ScalarKind::Long) => {
                ScalarKind::Double
            }
            _ => ScalarKind::Text,
        }
    }
}

/// Column set and types from the locking batch, in first-appearance order.
/// Null-only columns fall back to text.
fn infer_columns(rows: &[FlatRow]) -> Vec<(String, ScalarKind)> {
    let mut columns: IndexMap<String, Option<ScalarKind>> = IndexMap::new();
    for row in rows {
        for (key, value) in row {
            let observed = ScalarKind::of(value);
            let entry = columns.entry(key.clone()).or_insert(None);
            *entry = match (*entry, observed) {
                (Some(a), Some(b)) => Some(a.merge(b)),
                (known, None) => known,
                (None, observed) => observed,
            };
        }
    }
    columns
        .into_iter()
        .map(|(name, kind)| (name, kind.unwrap_or(ScalarKind::Text)))
        .collect()
}

fn build_column(
    table: &str,
    column: &str,
    kind: ScalarKind,
    rows: &[FlatRow],
) -> Result<ArrayRef, FlattenError> {
    match kind {
        ScalarKind::Long => {
            let mut builder = Int64Builder::with_capacity(rows.len());
            for row in rows {
                match row.get(column) {
                    None | Some(Value::Null) => builder.append_null(),
                    Some(value) => match long_value(value) {
                        Some(v) => builder.append_value(v),
                        None => return Err(type_error(table, column, "a 64-bit integer", value)),
                    },
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        ScalarKind::Double => {
            let mut builder = Float64Builder::with_capacity(rows.len());
            for row in rows {
                match row.get(column) {
                    None | Some(Value::Null) => builder.append_null(),
                    Some(Value::Number(n)) => match n.as_f64() {
                        Some(v) => builder.append_value(v),
                        None => {
                            return Err(type_error(
                                table,
                                column,
                                "a 64-bit float",
                                &Value::Number(n.clone()),
                            ))
                        }
                    },
                    Some(other) => return Err(type_error(table, column, "a 64-bit float", other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        ScalarKind::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                match row.get(column) {
                    None | Some(Value::Null) => builder.append_null(),
                    Some(Value::Bool(b)) => builder.append_value(*b),
                    Some(other) => return Err(type_error(table, column, "a boolean", other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        ScalarKind::Text => {
            let mut builder = StringBuilder::new();
            for row in rows {
                match row.get(column) {
                    None | Some(Value::Null) => builder.append_null(),
                    Some(Value::String(s)) => builder.append_value(s),
                    // Sequences and JSON-encoded complexes keep their JSON
                    // form; other scalars are rendered as strings.
                    Some(other) => builder.append_value(other.to_string()),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}

fn long_value(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .filter(|f| (i64::MIN as f64..=i64::MAX as f64).contains(f))
            .map(|f| f as i64)
    })
}

fn type_error(table: &str, column: &str, expected: &'static str, value: &Value) -> FlattenError {
    FlattenError::ColumnType {
        table: table.to_string(),
        column: column.to_string(),
        expected,
        value: value.to_string(),
    }
}
