//! Row identifier strategies.

use crate::batch::FlatRow;
use crate::config::{IdStrategy, NaturalId};
use crate::error::FlattenError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Resolves identifiers for finished rows. Hash strategies are deterministic
/// functions of the row; the random strategy draws from the thread-local RNG.
pub(crate) struct IdGenerator<'a> {
    strategy: &'a IdStrategy,
    id_field: &'a str,
    parent_field: &'a str,
    time_field: Option<&'a str>,
}

impl<'a> IdGenerator<'a> {
    pub fn new(
        strategy: &'a IdStrategy,
        id_field: &'a str,
        parent_field: &'a str,
        time_field: Option<&'a str>,
    ) -> IdGenerator<'a> {
        IdGenerator {
            strategy,
            id_field,
            parent_field,
            time_field,
        }
    }

    /// The identifier for a row of `table`. The row holds data columns only;
    /// metadata is injected by the caller afterwards.
    pub fn row_id(&self, table: &str, row: &FlatRow) -> Result<String, FlattenError> {
        match self.strategy {
            IdStrategy::Random => Ok(Uuid::new_v4().to_string()),
            IdStrategy::Natural(natural) => {
                let field = natural
                    .field_for(table)
                    .ok_or_else(|| FlattenError::UnmappedNaturalId(table.to_string()))?;
                match row.get(field) {
                    Some(value) if !value.is_null() => Ok(id_string(value)),
                    _ => Err(FlattenError::MissingNaturalId {
                        table: table.to_string(),
                        field: field.to_string(),
                    }),
                }
            }
            IdStrategy::Hash => {
                let fields: BTreeMap<&str, &Value> = row
                    .iter()
                    .filter(|(name, _)| !self.is_metadata(name))
                    .map(|(name, value)| (name.as_str(), value))
                    .collect();
                hash_id(&fields)
            }
            IdStrategy::HashFields(names) => {
                let fields: BTreeMap<&str, &Value> = names
                    .iter()
                    .map(|name| (name.as_str(), row.get(name).unwrap_or(&Value::Null)))
                    .collect();
                hash_id(&fields)
            }
        }
    }

    fn is_metadata(&self, name: &str) -> bool {
        name == self.id_field || name == self.parent_field || Some(name) == self.time_field
    }
}

/// Identifiers lifted from user data: strings are used verbatim, other
/// scalars use their JSON form.
pub(crate) fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical JSON (lexicographically sorted keys, shortest round-trip
/// numbers, UTF-8 strings) hashed with SHA-256; the first 128 bits are
/// rendered in UUID form.
fn hash_id(fields: &BTreeMap<&str, &Value>) -> Result<String, FlattenError> {
    let canonical = serde_json::to_vec(fields)?;
    let digest = Sha256::digest(&canonical);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Ok(Uuid::from_bytes(bytes).to_string())
}
