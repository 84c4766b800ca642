//! I/O utilities.

use crate::error::Result;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Read and deserialize a JSON file.
pub fn read_json_file<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(Into::into)
}

/// Read a JSON file into an untyped `serde_json::Value`.
pub fn read_json_value(path: impl AsRef<Path>) -> Result<serde_json::Value> {
    read_json_file(path)
}
