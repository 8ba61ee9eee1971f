// In: src/bridge/format.rs

//! Defines the table-level structures produced by resolution and consumed by
//! every reader. This is the single source of truth for how a JSON document's
//! layout is described: its shape, its unified schema, and the byte ranges of
//! independently addressable columns.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::{JsonTableError, Result};

//==================================================================================
// I. Byte Ranges
//==================================================================================

/// A half-open byte interval `[offset, offset + size)` into the original input.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileRange {
    pub offset: u64,
    pub size: u64,
}

impl FileRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Builds the range spanning `[start, end)`.
    pub(crate) fn between(start: u64, end: u64) -> Self {
        Self {
            offset: start,
            size: end.saturating_sub(start),
        }
    }

    /// The first byte past the range.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn overlaps(&self, other: &FileRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// Returns `true` if the range lies entirely inside an input of `len` bytes.
    pub fn fits_within(&self, len: u64) -> bool {
        self.offset.checked_add(self.size).is_some_and(|end| end <= len)
    }
}

impl fmt::Display for FileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}

//==================================================================================
// II. Table Shape
//==================================================================================

/// The top-level structural pattern of a JSON document as it maps to a table.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableShape {
    /// `[{...}, {...}]`: each element of the top-level array is one row.
    RowsArray,
    /// `{"a": [...], "b": [...]}`: each field is one column, all equal length.
    ColumnsObject,
    /// `{"a": 1, "b": "x"}`: the top-level object is exactly one row.
    SingleRow,
    /// None of the above. Never produces rows.
    #[default]
    Unrecognized,
}

impl fmt::Display for TableShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableShape::RowsArray => "ROWS_ARRAY",
            TableShape::ColumnsObject => "COLUMNS_OBJECT",
            TableShape::SingleRow => "SINGLE_ROW",
            TableShape::Unrecognized => "UNRECOGNIZED",
        };
        f.write_str(name)
    }
}

//==================================================================================
// III. Column Boundary Index
//==================================================================================

/// Maps each column of a `COLUMNS_OBJECT` document to the byte span of its
/// array value. Empty for every other shape.
///
/// Columns are kept in insertion order, which the resolver makes the schema
/// order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnBoundaries {
    ranges: HashMap<String, FileRange>,
    order: Vec<String>,
}

impl ColumnBoundaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the span of `column`. Returns `false` if the column was already present.
    pub(crate) fn insert(&mut self, column: String, range: FileRange) -> bool {
        if self.ranges.contains_key(&column) {
            return false;
        }
        self.order.push(column.clone());
        self.ranges.insert(column, range);
        true
    }

    pub fn get(&self, column: &str) -> Option<FileRange> {
        self.ranges.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates the boundaries in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FileRange)> {
        self.order
            .iter()
            .filter_map(|name| self.ranges.get(name).map(|range| (name.as_str(), *range)))
    }

    /// Iterates the boundaries in ascending byte order.
    pub fn iter_by_offset(&self) -> impl Iterator<Item = (&str, FileRange)> {
        let mut entries: Vec<(&str, FileRange)> = self.iter().collect();
        entries.sort_by_key(|(_, range)| range.offset);
        entries.into_iter()
    }

    /// Returns `true` if no two spans share a byte.
    pub fn is_disjoint(&self) -> bool {
        let sorted: Vec<FileRange> = self.iter_by_offset().map(|(_, r)| r).collect();
        sorted.windows(2).all(|pair| pair[0].end() <= pair[1].offset)
    }

    /// Sum of all span lengths.
    pub fn total_len(&self) -> u64 {
        self.ranges.values().map(|r| r.size).sum()
    }
}

impl FromIterator<(String, FileRange)> for ColumnBoundaries {
    /// Later duplicates of a column name are ignored.
    fn from_iter<I: IntoIterator<Item = (String, FileRange)>>(iter: I) -> Self {
        let mut boundaries = Self::new();
        for (column, range) in iter {
            boundaries.insert(column, range);
        }
        boundaries
    }
}

//==================================================================================
// IV. Table Type
//==================================================================================

/// The immutable result of resolution. Shared read-only (via `Arc`) by every
/// reader built from it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TableType {
    shape: TableShape,
    schema: SchemaRef,
    column_boundaries: ColumnBoundaries,
    /// Span of the top-level value (the data region readers rewind to).
    data_range: FileRange,
    /// Row count observed during resolution.
    num_rows: u64,
}

impl TableType {
    /// Assembles a table type. Callers holding a cached or externally known
    /// layout can build one directly instead of re-resolving.
    pub fn new(
        shape: TableShape,
        schema: impl Into<SchemaRef>,
        column_boundaries: ColumnBoundaries,
        data_range: FileRange,
        num_rows: u64,
    ) -> Self {
        Self {
            shape,
            schema: schema.into(),
            column_boundaries,
            data_range,
            num_rows,
        }
    }

    pub fn shape(&self) -> TableShape {
        self.shape
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn column_boundaries(&self) -> &ColumnBoundaries {
        &self.column_boundaries
    }

    pub fn data_range(&self) -> FileRange {
        self.data_range
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Serializes the table type so it can be cached next to the document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

//==================================================================================
// V. Table Descriptor
//==================================================================================

/// A validated `TableType` plus the negotiated batch size.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    table_type: Arc<TableType>,
    batch_size: usize,
}

impl TableDescriptor {
    /// Validates `table_type` and `batch_size`.
    ///
    /// Fails with `UnsupportedShape` for `UNRECOGNIZED` tables and with
    /// `InvalidDescriptor` for an empty schema, a zero batch size, or a
    /// columns table whose boundary index does not cover every column.
    pub fn new(table_type: impl Into<Arc<TableType>>, batch_size: usize) -> Result<Self> {
        let table_type = table_type.into();
        if table_type.shape == TableShape::Unrecognized {
            return Err(JsonTableError::UnsupportedShape(table_type.shape));
        }
        if table_type.schema.fields().is_empty() {
            return Err(JsonTableError::InvalidDescriptor(
                "table schema has no fields".into(),
            ));
        }
        if batch_size == 0 {
            return Err(JsonTableError::InvalidDescriptor(
                "batch size must be greater than zero".into(),
            ));
        }
        match table_type.shape {
            TableShape::ColumnsObject => {
                validate_columns_boundaries(&table_type.schema, &table_type.column_boundaries)?
            }
            _ if !table_type.column_boundaries.is_empty() => {
                return Err(JsonTableError::InvalidDescriptor(format!(
                    "{} tables carry no column boundaries",
                    table_type.shape
                )));
            }
            _ => {}
        }
        Ok(Self {
            table_type,
            batch_size,
        })
    }

    /// Builds a descriptor with the default batch size of 1024 rows.
    pub fn with_default_batch_size(table_type: impl Into<Arc<TableType>>) -> Result<Self> {
        Self::new(table_type, DEFAULT_BATCH_SIZE)
    }

    pub fn table_type(&self) -> &Arc<TableType> {
        &self.table_type
    }

    pub fn shape(&self) -> TableShape {
        self.table_type.shape
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

fn validate_columns_boundaries(schema: &Schema, boundaries: &ColumnBoundaries) -> Result<()> {
    for field in schema.fields() {
        if boundaries.get(field.name()).is_none() {
            return Err(JsonTableError::InvalidDescriptor(format!(
                "column '{}' has no byte range in the boundary index",
                field.name()
            )));
        }
    }
    if !boundaries.is_disjoint() {
        return Err(JsonTableError::InvalidDescriptor(
            "column byte ranges overlap".into(),
        ));
    }
    Ok(())
}

//==================================================================================
// VI. Table Statistics
//==================================================================================

/// A summary of a resolved document, returned by `analyze_table`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TableStats {
    pub shape: TableShape,
    pub num_rows: u64,
    pub num_columns: usize,
    /// Size of the top-level value in bytes.
    pub data_size: u64,
    /// Size of the whole input in bytes.
    pub total_size: u64,
    /// Column spans in byte order (`COLUMNS_OBJECT` only).
    pub boundaries: Vec<(String, FileRange)>,
}

impl TableStats {
    pub fn from_table_type(table: &TableType, total_size: u64) -> Self {
        Self {
            shape: table.shape,
            num_rows: table.num_rows,
            num_columns: table.schema.fields().len(),
            data_size: table.data_range.size,
            total_size,
            boundaries: table
                .column_boundaries
                .iter()
                .map(|(name, range)| (name.to_string(), range))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
