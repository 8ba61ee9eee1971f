// In: src/config.rs

//! The single source of truth for all jsontable configuration.
//!
//! Two option sets exist because resolution and reading are separate stages:
//! `ResolveOptions` guides the one-time shape and schema pre-pass, while
//! `ReaderOptions` controls how the resulting table is materialized into
//! batches. Both are plain serde structs so they can be created at the
//! application boundary (e.g. from a JSON options blob) and passed down.

use std::collections::BTreeMap;

use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};

use crate::bridge::format::TableShape;
use crate::error::Result;

/// The default number of rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1024;
/// The default size of the read buffer wrapped around an input source.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

//==================================================================================
// I. Resolution Options
//==================================================================================

/// Options for the shape and schema resolver.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ResolveOptions {
    /// If set, resolution fails with `UnrecognizedShape` unless the document
    /// has exactly this shape.
    #[serde(default)]
    pub expected_shape: Option<TableShape>,

    /// Limits type inference to the first N rows (or the first N elements of
    /// each column). The rest of the document is still validated.
    /// When inference stops early, every field is declared nullable.
    #[serde(default)]
    pub max_inference_rows: Option<usize>,

    /// Per-field type overrides. A hinted field skips inference entirely.
    #[serde(default)]
    pub type_hints: BTreeMap<String, DataType>,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            expected_shape: None,
            max_inference_rows: None,
            type_hints: BTreeMap::new(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl ResolveOptions {
    /// Loads options from a JSON object, e.g. `{"max_inference_rows": 100}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_expected_shape(mut self, shape: TableShape) -> Self {
        self.expected_shape = Some(shape);
        self
    }

    pub fn with_max_inference_rows(mut self, rows: usize) -> Self {
        self.max_inference_rows = Some(rows);
        self
    }

    pub fn with_type_hint(mut self, field: impl Into<String>, data_type: DataType) -> Self {
        self.type_hints.insert(field.into(), data_type);
        self
    }
}

//==================================================================================
// II. Reader Options
//==================================================================================

/// Options for the batch reader façade.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReaderOptions {
    /// **The maximum number of rows per batch.** Must be greater than zero.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Columns to materialize, in output order. `None` reads every column.
    /// For `COLUMNS_OBJECT` tables, columns outside the projection are never
    /// touched on disk.
    #[serde(default)]
    pub projection: Option<Vec<String>>,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            projection: None,
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl ReaderOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_projection<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Helper for `serde` to provide a default for `batch_size`.
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Helper for `serde` to provide a default for `read_buffer_size`.
fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}
