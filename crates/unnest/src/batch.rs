//! Row and batch containers shared by the flattener, the pipeline, and the
//! writers.

use indexmap::IndexMap;
use serde_json::Value;

/// One flat row: column name to scalar cell, in first-write order.
pub type FlatRow = IndexMap<String, Value>;

/// Ordered map of table name to rows, main table first.
pub(crate) type Tables = IndexMap<String, Vec<FlatRow>>;

/// The per-table batches handed to a writer in one append call. Parent rows
/// always precede their descendants within a group.
#[derive(Debug, Default)]
pub struct FlushGroup {
    tables: Tables,
}

impl FlushGroup {
    pub(crate) fn new(tables: Tables) -> FlushGroup {
        FlushGroup { tables }
    }

    /// Iterate tables in insertion order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &[FlatRow])> + '_ {
        self.tables
            .iter()
            .map(|(name, rows)| (name.as_str(), rows.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty)
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

/// Collects per-record flattener output and cuts a flush group once any table
/// reaches the batch size. The whole map is flushed atomically, which keeps
/// every parent row ahead of its descendants.
pub(crate) struct BatchAssembler {
    tables: Tables,
    batch_size: usize,
}

impl BatchAssembler {
    pub fn new(batch_size: usize) -> BatchAssembler {
        BatchAssembler {
            tables: Tables::new(),
            batch_size,
        }
    }

    /// Fold one record's tables into the pending batch.
    pub fn absorb(&mut self, output: Tables) {
        for (table, mut rows) in output {
            self.tables.entry(table).or_default().append(&mut rows);
        }
    }

    pub fn ready(&self) -> bool {
        self.tables.values().any(|rows| rows.len() >= self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty)
    }

    /// Drain the pending batch as one flush group.
    pub fn take(&mut self) -> FlushGroup {
        FlushGroup::new(std::mem::take(&mut self.tables))
    }
}
