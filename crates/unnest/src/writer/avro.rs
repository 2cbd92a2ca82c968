//! Avro object-container sink: one file per table with union-typed columns.
//!
//! Every column schema is a union led by `"null"`, so rows that omit a
//! column (and doubles coerced away from non-finite values) encode as null
//! without disturbing the locked schema.

use super::{drifted, AvroCodec, AvroOptions, Layout, ScalarKind, Writer, WriterState};
use crate::batch::{FlatRow, FlushGroup};
use crate::error::FlattenError;
use apache_avro::types::Value as AvroValue;
use apache_avro::{Codec, Schema};
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fs;

pub(crate) struct AvroWriter {
    layout: Layout,
    codec: Codec,
    tables: IndexMap<String, AvroTable>,
    state: WriterState,
}

struct AvroTable {
    columns: Vec<AvroColumn>,
    writer: apache_avro::Writer<'static, fs::File>,
}

struct AvroColumn {
    /// Column name as produced by the flattener.
    column: String,
    /// Sanitized Avro field name.
    field: String,
    /// Scalar types in the union, after the leading null.
    kinds: Vec<ScalarKind>,
}

impl AvroColumn {
    fn union_index(&self, kind: ScalarKind) -> Option<u32> {
        self.kinds.iter().position(|k| *k == kind).map(|i| (i + 1) as u32)
    }
}

impl AvroWriter {
    /// Open the writer, resolving the codec up front. Codecs not compiled
    /// into this build are unrepresentable in [`AvroCodec`] and surface as
    /// dependency failures at the configuration boundary instead.
    pub fn open(layout: Layout, options: AvroOptions) -> Result<AvroWriter, FlattenError> {
        let codec = match options.codec {
            AvroCodec::Null => Codec::Null,
            AvroCodec::Deflate => Codec::Deflate,
            AvroCodec::Snappy => Codec::Snappy,
        };
        Ok(AvroWriter {
            layout,
            codec,
            tables: IndexMap::new(),
            state: WriterState::Open,
        })
    }

    fn lock_table(&self, name: &str, rows: &[FlatRow]) -> Result<AvroTable, FlattenError> {
        let columns = infer_columns(rows);
        let schema = Schema::parse(&schema_json(name, &columns))?;
        let file = self.layout.create(name)?;
        // The container writer borrows its schema; keep the schema alive for
        // the remainder of the process.
        let schema: &'static Schema = Box::leak(Box::new(schema));
        let writer = apache_avro::Writer::with_codec(schema, file, self.codec);
        Ok(AvroTable { columns, writer })
    }

    fn append_inner(&mut self, group: FlushGroup) -> Result<(), FlattenError> {
        for (name, rows) in group.tables() {
            if rows.is_empty() {
                continue;
            }
            if !self.tables.contains_key(name) {
                let table = self.lock_table(name, rows)?;
                tracing::debug!(table = name, columns = table.columns.len(), "locked avro schema");
                self.tables.insert(name.to_string(), table);
            }
            let Some(table) = self.tables.get_mut(name) else {
                continue;
            };

            if let Some(column) = drifted(
                |c| table.columns.iter().any(|col| col.column == c),
                rows,
            )
            .first()
            {
                return Err(FlattenError::SchemaDrift {
                    table: name.to_string(),
                    column: column.to_string(),
                });
            }

            for row in rows {
                let record = encode_row(name, &table.columns, row)?;
                table.writer.append(record)?;
            }
        }
        Ok(())
    }

    fn finalize_inner(&mut self) -> Result<(), FlattenError> {
        for (name, table) in self.tables.iter_mut() {
            table.writer.flush()?;
            tracing::debug!(table = %name, "closed avro file");
        }
        Ok(())
    }
}

impl Writer for AvroWriter {
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
    fn avro_type(self) -> &'static str {
        match self {
            ScalarKind::Boolean => "boolean",
            ScalarKind::Long => "long",
            ScalarKind::Double => "double",
            ScalarKind::Text => "string",
        }
    }
}

/// Column set from the locking batch: each column records the scalar types
/// observed, in observation order.
fn infer_columns(rows: &[FlatRow]) -> Vec<AvroColumn> {
    let mut kinds_by_column: IndexMap<String, Vec<ScalarKind>> = IndexMap::new();
    for row in rows {
        for (key, value) in row {
            let kinds = kinds_by_column.entry(key.clone()).or_default();
            if let Some(kind) = ScalarKind::of(value) {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
        }
    }

    let mut used = BTreeSet::new();
    kinds_by_column
        .into_iter()
        .map(|(column, kinds)| AvroColumn {
            field: sanitize(&column, &mut used),
            column,
            kinds,
        })
        .collect()
}

/// Avro names are restricted to `[A-Za-z_][A-Za-z0-9_]*`; other characters
/// map to `_` and collisions get a numeric suffix.
fn sanitize(name: &str, used: &mut BTreeSet<String>) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        sanitized.push('_');
    }
    if sanitized.as_bytes()[0].is_ascii_digit() {
        sanitized.insert(0, '_');
    }
    let mut candidate = sanitized.clone();
    let mut n = 1;
    while !used.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{}_{}", sanitized, n);
    }
    candidate
}

/// The record schema for one table: every field is a union carrying null
/// first, then each observed scalar type.
fn schema_json(table: &str, columns: &[AvroColumn]) -> Value {
    let fields: Vec<Value> = columns
        .iter()
        .map(|column| {
            let mut union = vec![json!("null")];
            union.extend(column.kinds.iter().map(|kind| json!(kind.avro_type())));
            json!({"name": column.field, "type": union, "default": null})
        })
        .collect();
    let record_name = sanitize(table, &mut BTreeSet::new());
    json!({"type": "record", "name": record_name, "fields": fields})
}

fn encode_row(
    table: &str,
    columns: &[AvroColumn],
    row: &FlatRow,
) -> Result<AvroValue, FlattenError> {
    let mut fields = Vec::with_capacity(columns.len());
    for column in columns {
        let cell = cell(table, column, row.get(&column.column))?;
        fields.push((column.field.clone(), cell));
    }
    Ok(AvroValue::Record(fields))
}

fn cell(
    table: &str,
    column: &AvroColumn,
    value: Option<&Value>,
) -> Result<AvroValue, FlattenError> {
    let Some(value) = value else {
        return Ok(null_cell());
    };
    match value {
        Value::Null => Ok(null_cell()),
        Value::Bool(b) => match column.union_index(ScalarKind::Boolean) {
            Some(index) => Ok(AvroValue::Union(index, Box::new(AvroValue::Boolean(*b)))),
            None => text_cell(table, column, value),
        },
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if let Some(index) = column.union_index(ScalarKind::Long) {
                    return Ok(AvroValue::Union(index, Box::new(AvroValue::Long(i))));
                }
                if let Some(index) = column.union_index(ScalarKind::Double) {
                    return Ok(AvroValue::Union(
                        index,
                        Box::new(AvroValue::Double(i as f64)),
                    ));
                }
            } else if let Some(f) = n.as_f64() {
                if let Some(cell) = double_cell(column, f) {
                    return Ok(cell);
                }
            }
            text_cell(table, column, value)
        }
        Value::String(s) => match column.union_index(ScalarKind::Text) {
            Some(index) => Ok(AvroValue::Union(
                index,
                Box::new(AvroValue::String(s.clone())),
            )),
            None => Err(type_mismatch(table, column, value)),
        },
        other => text_cell(table, column, other),
    }
}

/// Encode a raw double, coercing non-finite values to null. Returns `None`
/// when the union has no branch that can hold a double.
fn double_cell(column: &AvroColumn, f: f64) -> Option<AvroValue> {
    if !f.is_finite() {
        return Some(null_cell());
    }
    column
        .union_index(ScalarKind::Double)
        .map(|index| AvroValue::Union(index, Box::new(AvroValue::Double(f))))
}

fn null_cell() -> AvroValue {
    AvroValue::Union(0, Box::new(AvroValue::Null))
}

/// Fall back to the string variant, rendering the value in JSON form.
fn text_cell(
    table: &str,
    column: &AvroColumn,
    value: &Value,
) -> Result<AvroValue, FlattenError> {
    match column.union_index(ScalarKind::Text) {
        Some(index) => {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Ok(AvroValue::Union(index, Box::new(AvroValue::String(rendered))))
        }
        None => Err(type_mismatch(table, column, value)),
    }
}

fn type_mismatch(table: &str, column: &AvroColumn, value: &Value) -> FlattenError {
    FlattenError::ColumnType {
        table: table.to_string(),
        column: column.column.clone(),
        expected: "locked to an avro union without a matching branch",
        value: value.to_string(),
    }
}
