//! The recursive flattener: one pass per record producing a flat row for the
//! main table plus extracted batches for child tables.

mod arrays;
mod ids;
mod path;

use crate::batch::{FlatRow, Tables};
use crate::config::{FlattenConfig, IdStrategy};
use crate::error::FlattenError;
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;

/// Flattens records under one entity name. Holds the per-run timestamp and
/// the count of subtrees dropped by the depth guard.
pub(crate) struct Flattener<'a> {
    config: &'a FlattenConfig,
    entity: String,
    ids: ids::IdGenerator<'a>,
    timestamp: Option<Value>,
    truncated: u64,
}

/// Per-row traversal state.
#[derive(Default)]
struct Walk {
    /// Path components from the row root to the current location.
    path: Vec<String>,
    row: FlatRow,
    /// Arrays queued for extraction once the row's id is known.
    deferred: Vec<DeferredArray>,
}

/// An array awaiting extraction to a child table.
struct DeferredArray {
    /// Path components from the row root down to the array.
    components: Vec<String>,
    items: Vec<Value>,
}

impl<'a> Flattener<'a> {
    pub fn new(entity: &str, config: &'a FlattenConfig) -> Result<Flattener<'a>, FlattenError> {
        let timestamp = match &config.time_field {
            Some(_) => Some(Value::String(
                time::OffsetDateTime::now_utc().format(&Rfc3339)?,
            )),
            None => None,
        };
        Ok(Flattener {
            config,
            entity: entity.to_string(),
            ids: ids::IdGenerator::new(
                &config.id_generation,
                &config.id_field,
                &config.parent_field,
                config.time_field.as_deref(),
            ),
            timestamp,
            truncated: 0,
        })
    }

    /// Number of subtrees dropped by the depth guard so far.
    pub fn truncated(&self) -> u64 {
        self.truncated
    }

    /// Flatten one record into `out`: the main row first, then child rows in
    /// extraction order.
    pub fn flatten_record(&mut self, record: Value, out: &mut Tables) -> Result<(), FlattenError> {
        let object = match record {
            Value::Object(object) => object,
            other => return Err(FlattenError::RecordNotObject(json_type(&other))),
        };
        let table_path = vec![self.entity.clone()];
        self.flatten_into(object, &table_path, None, out)
    }

    /// Flatten `object` as one row of the table named by `table_path`, then
    /// extract its deferred arrays as children linked to the row's id.
    fn flatten_into(
        &mut self,
        object: Map<String, Value>,
        table_path: &[String],
        parent_id: Option<&str>,
        out: &mut Tables,
    ) -> Result<(), FlattenError> {
        let table = path::table_name(
            table_path,
            &self.config.separator,
            self.config.deep_nesting_threshold,
        );
        let mut walk = Walk::default();
        self.walk_object(object, &mut walk)?;
        let Walk { row, deferred, .. } = walk;

        let (id, row) = self.finish_row(&table, row, parent_id)?;
        out.entry(table).or_default().push(row);

        for array in deferred {
            self.extract_array(array, table_path, &id, out)?;
        }
        Ok(())
    }

    fn walk_object(
        &mut self,
        object: Map<String, Value>,
        walk: &mut Walk,
    ) -> Result<(), FlattenError> {
        for (key, value) in object {
            walk.path.push(key);
            match value {
                Value::Object(nested) => {
                    if walk.path.len() < self.config.max_depth {
                        self.walk_object(nested, walk)?;
                    } else {
                        self.truncated += 1;
                        tracing::debug!(depth = walk.path.len(), "dropped subtree past maxDepth");
                    }
                }
                Value::Array(items) => self.walk_array(items, walk)?,
                leaf => self.emit_leaf(leaf, walk),
            }
            walk.path.pop();
        }
        Ok(())
    }

    fn emit_leaf(&self, leaf: Value, walk: &mut Walk) {
        if !self.config.include_nulls && is_empty_leaf(&leaf) {
            return;
        }
        let name = path::column_name(
            &walk.path,
            &self.config.separator,
            self.config.deep_nesting_threshold,
        );
        walk.row.insert(name, self.cast_leaf(leaf));
    }

    /// Apply the stringify policy to a leaf. Sequences are not scalars and
    /// pass through untouched.
    fn cast_leaf(&self, leaf: Value) -> Value {
        if !self.config.stringify_values {
            return leaf;
        }
        match leaf {
            Value::Bool(true) => Value::String("True".to_string()),
            Value::Bool(false) => Value::String("False".to_string()),
            Value::Number(n) => Value::String(n.to_string()),
            other => other,
        }
    }

    /// Resolve the row's id (user data wins over the generator) and inject
    /// the metadata columns the data does not already carry.
    fn finish_row(
        &self,
        table: &str,
        data: FlatRow,
        parent_id: Option<&str>,
    ) -> Result<(String, FlatRow), FlattenError> {
        let id = match data.get(&self.config.id_field) {
            Some(Value::Null) => {
                return Err(FlattenError::MissingNaturalId {
                    table: table.to_string(),
                    field: self.config.id_field.clone(),
                })
            }
            Some(value) => ids::id_string(value),
            None => self.ids.row_id(table, &data)?,
        };

        // Natural ids live in their data column; everything else injects the
        // id column unless the data already claimed the name.
        let inject_id = !matches!(self.config.id_generation, IdStrategy::Natural(_))
            && !data.contains_key(&self.config.id_field);

        let mut row = FlatRow::with_capacity(data.len() + 3);
        if inject_id {
            row.insert(self.config.id_field.clone(), Value::String(id.clone()));
        }
        if let Some(parent) = parent_id {
            if !data.contains_key(&self.config.parent_field) {
                row.insert(
                    self.config.parent_field.clone(),
                    Value::String(parent.to_string()),
                );
            }
        }
        row.extend(data);
        if let (Some(field), Some(stamp)) = (&self.config.time_field, &self.timestamp) {
            if !row.contains_key(field) {
                row.insert(field.clone(), stamp.clone());
            }
        }
        Ok((id, row))
    }
}

fn is_empty_leaf(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
