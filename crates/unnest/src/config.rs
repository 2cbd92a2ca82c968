//! Run configuration for flattening and export.

use crate::error::FlattenError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default rows per flush group when flattening in memory.
pub(crate) const MEMORY_BATCH_SIZE: usize = 1000;
/// Default rows per flush group when streaming into a writer.
pub(crate) const STREAM_BATCH_SIZE: usize = 100;

/// Policy applied to arrays encountered during the flatten walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ArrayMode {
    /// Arrays of primitives stay inline on the parent row; arrays containing
    /// objects are extracted to a child table.
    #[default]
    Smart,
    /// Always extract to a child table, wrapping primitive elements as
    /// `{"value": ..}`.
    Separate,
    /// Encode the whole array as a JSON string on the parent row.
    Inline,
    /// Drop arrays entirely.
    Skip,
}

/// Where a row identifier comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum IdStrategy {
    /// A fresh v4 UUID per row.
    #[default]
    Random,
    /// Lift the id from an existing column of the row. The named column
    /// doubles as the id column; no separate id is injected.
    Natural(NaturalId),
    /// Deterministic hash of the whole flat row, excluding metadata columns.
    Hash,
    /// Deterministic hash over only the listed fields. A missing field
    /// contributes a null.
    HashFields(Vec<String>),
}

/// The column holding a natural id: one field name applied to every table, or
/// a map of table name to field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum NaturalId {
    Field(String),
    PerTable(BTreeMap<String, String>),
}

impl NaturalId {
    pub(crate) fn field_for(&self, table: &str) -> Option<&str> {
        match self {
            NaturalId::Field(field) => Some(field),
            NaturalId::PerTable(map) => map.get(table).map(String::as_str),
        }
    }
}

/// How the CSV writer responds to columns that appear after a table's schema
/// has locked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SchemaDrift {
    /// Reject the batch with an output error.
    #[default]
    Strict,
    /// Discard unexpected columns with a warning; missing columns are written
    /// as empty values.
    Drop,
}

/// Configures how records are flattened and how writers behave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct FlattenConfig {
    /// Policy applied to arrays. See [`ArrayMode`].
    pub array_mode: ArrayMode,

    /// Keep null and empty-string leaves as columns. The default omits them.
    pub include_nulls: bool,

    /// Convert every non-null scalar to its string form after flattening.
    /// Booleans spell `"True"` and `"False"`; numbers use their shortest
    /// round-trip form.
    pub stringify_values: bool,

    /// Maximum number of path components below a record; deeper subtrees are
    /// dropped silently.
    pub max_depth: usize,

    /// Row identifier strategy. See [`IdStrategy`].
    pub id_generation: IdStrategy,

    /// Name of the injected id column.
    pub id_field: String,

    /// Name of the injected parent-link column on child rows.
    pub parent_field: String,

    /// Name of the injected timestamp column. `null` disables timestamps.
    pub time_field: Option<String>,

    /// Rows per flush group. When unset, 1000 rows in memory and 100 rows
    /// when streaming.
    pub batch_size: Option<usize>,

    /// Separator joining path components into column and table names.
    pub separator: String,

    /// Component count above which column and table names are simplified.
    pub deep_nesting_threshold: usize,

    /// CSV-writer response to post-lock schema drift.
    pub schema_drift: SchemaDrift,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        FlattenConfig {
            array_mode: ArrayMode::Smart,
            include_nulls: false,
            stringify_values: false,
            max_depth: 100,
            id_generation: IdStrategy::Random,
            id_field: "_id".to_string(),
            parent_field: "_parent_id".to_string(),
            time_field: Some("_timestamp".to_string()),
            batch_size: None,
            separator: "_".to_string(),
            deep_nesting_threshold: 4,
            schema_drift: SchemaDrift::Strict,
        }
    }
}

impl FlattenConfig {
    /// Returns the generated JSON schema for the configuration.
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(FlattenConfig)
    }

    /// Check option ranges and metadata column-name uniqueness.
    pub fn validate(&self) -> Result<(), FlattenError> {
        if self.max_depth == 0 {
            return Err(invalid("maxDepth must be at least 1"));
        }
        if self.batch_size == Some(0) {
            return Err(invalid("batchSize must be at least 1"));
        }
        if self.separator.is_empty() {
            return Err(invalid("separator must not be empty"));
        }
        if self.deep_nesting_threshold == 0 {
            return Err(invalid("deepNestingThreshold must be at least 1"));
        }
        if self.id_field.is_empty() || self.parent_field.is_empty() {
            return Err(invalid("idField and parentField must not be empty"));
        }
        if self.id_field == self.parent_field {
            return Err(invalid("idField and parentField must differ"));
        }
        if let Some(time_field) = &self.time_field {
            if time_field.is_empty() {
                return Err(invalid("timeField must be a column name or null"));
            }
            if time_field == &self.id_field || time_field == &self.parent_field {
                return Err(invalid("timeField collides with another metadata column"));
            }
        }
        match &self.id_generation {
            IdStrategy::HashFields(fields) if fields.is_empty() => {
                Err(invalid("hashFields requires at least one field name"))
            }
            IdStrategy::Natural(NaturalId::Field(field)) if field.is_empty() => {
                Err(invalid("natural id field must not be empty"))
            }
            IdStrategy::Natural(NaturalId::PerTable(map)) if map.is_empty() => {
                Err(invalid("natural id table map must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

fn invalid(message: &str) -> FlattenError {
    FlattenError::InvalidConfig(message.to_string())
}
