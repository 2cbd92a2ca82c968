//! Array policy: inline, JSON-encode, drop, or extract to a child table.

use super::{path, DeferredArray, Flattener, Walk};
use crate::batch::Tables;
use crate::config::ArrayMode;
use crate::error::FlattenError;
use serde_json::{Map, Value};

impl Flattener<'_> {
    /// Apply the configured array mode to an array at the walk's current
    /// path. Extraction is deferred until the enclosing row's id is known.
    pub(super) fn walk_array(
        &mut self,
        items: Vec<Value>,
        walk: &mut Walk,
    ) -> Result<(), FlattenError> {
        match self.config.array_mode {
            ArrayMode::Skip => Ok(()),
            ArrayMode::Inline => {
                let name = self.column_at(walk);
                let encoded = serde_json::to_string(&Value::Array(items))?;
                walk.row.insert(name, Value::String(encoded));
                Ok(())
            }
            ArrayMode::Smart if items.iter().all(is_primitive) => {
                let name = self.column_at(walk);
                walk.row.insert(name, Value::Array(items));
                Ok(())
            }
            ArrayMode::Smart | ArrayMode::Separate => {
                walk.deferred.push(DeferredArray {
                    components: walk.path.clone(),
                    items,
                });
                Ok(())
            }
        }
    }

    /// Extract one deferred array into child-table rows. `base` is the
    /// parent table's name ancestry and `parent_id` the enclosing row's id.
    pub(super) fn extract_array(
        &mut self,
        array: DeferredArray,
        base: &[String],
        parent_id: &str,
        out: &mut Tables,
    ) -> Result<(), FlattenError> {
        let mut table_path = base.to_vec();
        table_path.extend(array.components);

        // Defensive cap on pathological alternating object/array nesting.
        if table_path.len() > self.config.max_depth {
            self.truncated += 1;
            tracing::debug!(
                components = table_path.len(),
                "dropped child table past maxDepth"
            );
            return Ok(());
        }

        for element in array.items {
            let object = match element {
                Value::Object(object) => object,
                other => {
                    let mut wrapped = Map::new();
                    wrapped.insert("value".to_string(), other);
                    wrapped
                }
            };
            self.flatten_into(object, &table_path, Some(parent_id), out)?;
        }
        Ok(())
    }

    fn column_at(&self, walk: &Walk) -> String {
        path::column_name(
            &walk.path,
            &self.config.separator,
            self.config.deep_nesting_threshold,
        )
    }
}

/// Anything an array can hold inline: nulls and scalars.
fn is_primitive(value: &Value) -> bool {
    !(value.is_object() || value.is_array())
}
