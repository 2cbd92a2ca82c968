//! Row-oriented CSV sink: one file per table, with the column set and header
//! locked from the table's first non-empty batch.

use super::{drifted, locked_columns, CsvOptions, Layout, Writer, WriterState};
use crate::batch::FlushGroup;
use crate::config::SchemaDrift;
use crate::error::FlattenError;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;

pub(crate) struct CsvWriter {
    layout: Layout,
    options: CsvOptions,
    drift: SchemaDrift,
    tables: IndexMap<String, CsvTable>,
    state: WriterState,
}

struct CsvTable {
    columns: Vec<String>,
    writer: csv::Writer<fs::File>,
    /// Drifted columns already warned about under the drop policy.
    dropped: BTreeSet<String>,
}

impl CsvWriter {
    pub fn open(
        layout: Layout,
        options: CsvOptions,
        drift: SchemaDrift,
    ) -> Result<CsvWriter, FlattenError> {
        if !options.delimiter.is_ascii() || !options.quote.is_ascii() {
            return Err(FlattenError::InvalidConfig(
                "csv delimiter and quote must be ASCII".to_string(),
            ));
        }
        Ok(CsvWriter {
            layout,
            options,
            drift,
            tables: IndexMap::new(),
            state: WriterState::Open,
        })
    }

    fn append_inner(&mut self, group: FlushGroup) -> Result<(), FlattenError> {
        for (name, rows) in group.tables() {
            if rows.is_empty() {
                continue;
            }
            if !self.tables.contains_key(name) {
                let columns = locked_columns(rows);
                let file = self.layout.create(name)?;
                let mut writer = csv::WriterBuilder::new()
                    .delimiter(self.options.delimiter as u8)
                    .quote(self.options.quote as u8)
                    .from_writer(file);
                if self.options.headers {
                    writer.write_record(&columns)?;
                }
                tracing::debug!(table = name, columns = columns.len(), "locked csv schema");
                self.tables.insert(
                    name.to_string(),
                    CsvTable {
                        columns,
                        writer,
                        dropped: BTreeSet::new(),
                    },
                );
            }
            let Some(table) = self.tables.get_mut(name) else {
                continue;
            };

            for column in drifted(|c| table.columns.iter().any(|l| l == c), rows) {
                match self.drift {
                    SchemaDrift::Strict => {
                        return Err(FlattenError::SchemaDrift {
                            table: name.to_string(),
                            column: column.to_string(),
                        })
                    }
                    SchemaDrift::Drop => {
                        if table.dropped.insert(column.to_string()) {
                            tracing::warn!(
                                table = name,
                                column,
                                "dropping column not present at schema lock"
                            );
                        }
                    }
                }
            }

            for row in rows {
                let record: Vec<String> =
                    table.columns.iter().map(|column| cell(row.get(column))).collect();
                table.writer.write_record(&record)?;
            }
        }
        Ok(())
    }

    fn finalize_inner(&mut self) -> Result<(), FlattenError> {
        for (name, table) in self.tables.iter_mut() {
            table.writer.flush()?;
            tracing::debug!(table = %name, "closed csv file");
        }
        Ok(())
    }
}

impl Writer for CsvWriter {
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

/// Render one cell. Nulls and missing values become the empty string;
/// sequences and JSON-encoded values keep their JSON form.
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
