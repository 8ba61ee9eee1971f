// In: src/bridge/stateless_api.rs

use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;

use crate::bridge::format::{TableShape, TableStats, TableType};
use crate::bridge::reader::TableReader;
use crate::config::{ReaderOptions, ResolveOptions, DEFAULT_READ_BUFFER_SIZE};
use crate::error::{JsonTableError, Result};
use crate::json::JsonScanner;
use crate::resolver::resolve_table_type;
use crate::shapes::BatchBuilder;
use crate::source::InputSource;

/// Resolves the document in `source` and returns a prepared reader over it.
///
/// The source is rewound to the data region by `prepare`, so it must support
/// backward seeks. For forward-only streams, resolve once elsewhere and build
/// the reader with `TableReader::resolve` from the cached `TableType`.
pub fn open_table<S: InputSource + 'static>(
    mut source: S,
    resolve_options: &ResolveOptions,
    reader_options: &ReaderOptions,
) -> Result<TableReader> {
    let table_type = resolve_table_type(&mut source, resolve_options)?;
    let mut reader = TableReader::resolve_with_options(source, table_type, reader_options)?;
    reader.prepare()?;
    Ok(reader)
}

/// Resolves and reads the whole document into memory.
pub fn read_all<S: InputSource + 'static>(
    source: S,
    resolve_options: &ResolveOptions,
    reader_options: &ReaderOptions,
) -> Result<Vec<RecordBatch>> {
    let mut reader = open_table(source, resolve_options, reader_options)?;
    let mut batches = Vec::new();
    while let Some(batch) = reader.next_batch()? {
        batches.push(batch);
    }
    Ok(batches)
}

/// Resolves the document and summarizes its layout without reading any rows.
pub fn analyze_table<S: InputSource + ?Sized>(source: &mut S) -> Result<TableStats> {
    let total_size = source.size()?;
    let table_type = resolve_table_type(source, &ResolveOptions::default())?;
    Ok(TableStats::from_table_type(&table_type, total_size))
}

/// Re-reads a single column of a `COLUMNS_OBJECT` table directly from its
/// byte range, without touching the rest of the document.
pub fn read_column<S: InputSource + ?Sized>(
    source: &mut S,
    table_type: &TableType,
    name: &str,
) -> Result<ArrayRef> {
    if table_type.shape() != TableShape::ColumnsObject {
        return Err(JsonTableError::UnsupportedShape(table_type.shape()));
    }
    let schema = table_type.schema();
    let field = schema.field_with_name(name).map_err(|_| {
        JsonTableError::InvalidDescriptor(format!("column '{}' is not in the table schema", name))
    })?;
    let range = table_type.column_boundaries().get(name).ok_or_else(|| {
        JsonTableError::InvalidDescriptor(format!(
            "column '{}' has no byte range in the boundary index",
            name
        ))
    })?;

    let column_schema = Arc::new(Schema::new(vec![field.clone()]));
    let capacity = table_type.num_rows() as usize;
    let mut builder = BatchBuilder::try_new(column_schema, capacity)?;
    let mut scanner = JsonScanner::new(source, DEFAULT_READ_BUFFER_SIZE)?;
    if !range.fits_within(scanner.len()) {
        return Err(JsonTableError::SourceUnavailable {
            shape: TableShape::ColumnsObject,
            message: format!("column '{}' span {} lies beyond the input", name, range),
        });
    }

    scanner.seek(range.offset)?;
    scanner.begin_array()?;
    let mut row = 0u64;
    let mut first = true;
    let mut cell = Vec::with_capacity(1);
    while scanner.next_element(&mut first)? {
        let (value, value_range) = scanner.parse_value()?;
        cell.clear();
        cell.push((value, value_range.offset));
        builder.append_values(&cell, row)?;
        row += 1;
    }

    if scanner.position() != range.end() || row != table_type.num_rows() {
        return Err(JsonTableError::SourceUnavailable {
            shape: TableShape::ColumnsObject,
            message: format!(
                "column '{}' no longer matches its recorded span {} ({} of {} rows)",
                name,
                range,
                row,
                table_type.num_rows()
            ),
        });
    }

    let batch = builder.finish()?;
    log::debug!("Read column '{}' ({} rows) from {}", name, row, range);
    Ok(batch.column(0).clone())
}
