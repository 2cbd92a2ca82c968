//! Input normalization: the front doors accept an [`Input`] and the core
//! consumes a plain record iterator.

use crate::error::FlattenError;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Stream of records consumed by the flattener. Once an error is returned the
/// iterator is not polled again.
pub type Records = Box<dyn Iterator<Item = Result<Value, FlattenError>>>;

/// The inputs accepted by [`flatten`](crate::flatten) and
/// [`flatten_stream`](crate::flatten_stream).
pub enum Input {
    /// A single in-memory document: one record, or an array of records.
    Value(Value),
    /// A sequence of in-memory records.
    Values(Vec<Value>),
    /// An arbitrary record iterator.
    Iter(Records),
    /// A path to a `.json`, `.jsonl`, or `.ndjson` file. The format is
    /// determined by the extension.
    Path(PathBuf),
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

impl From<Vec<Value>> for Input {
    fn from(values: Vec<Value>) -> Self {
        Input::Values(values)
    }
}

impl From<PathBuf> for Input {
    fn from(path: PathBuf) -> Self {
        Input::Path(path)
    }
}

impl From<&Path> for Input {
    fn from(path: &Path) -> Self {
        Input::Path(path.to_path_buf())
    }
}

impl Input {
    /// Normalize into a record iterator.
    pub fn into_records(self) -> Result<Records, FlattenError> {
        match self {
            Input::Value(Value::Array(values)) => Ok(Box::new(values.into_iter().map(Ok))),
            Input::Value(value) => Ok(Box::new(std::iter::once(Ok(value)))),
            Input::Values(values) => Ok(Box::new(values.into_iter().map(Ok))),
            Input::Iter(records) => Ok(records),
            Input::Path(path) => records_from_path(&path),
        }
    }
}

fn records_from_path(path: &Path) -> Result<Records, FlattenError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("json") => {
            let file = open(path)?;
            let value: Value = serde_json::from_reader(io::BufReader::new(file))?;
            Input::Value(value).into_records()
        }
        // A stream of JSON documents separated by whitespace, which covers
        // JSONL and NDJSON.
        Some("jsonl") | Some("ndjson") => {
            let file = open(path)?;
            let documents = serde_json::Deserializer::from_reader(io::BufReader::new(file))
                .into_iter::<Value>();
            Ok(Box::new(documents.map(|r| r.map_err(Into::into))))
        }
        _ => Err(FlattenError::CannotInferFormat(path.to_path_buf())),
    }
}

fn open(path: &Path) -> Result<fs::File, FlattenError> {
    fs::File::open(path).map_err(|source| FlattenError::ReadInput {
        path: path.to_path_buf(),
        source,
    })
}
