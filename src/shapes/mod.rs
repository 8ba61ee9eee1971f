// In: src/shapes/mod.rs

//! Shape-specialized decoders.
//!
//! Each recognized `TableShape` has one decoder that knows how to walk its
//! layout and turn it into rows. The batch reader façade owns exactly one of
//! them behind the `ShapeDecoder` contract and never inspects the shape again
//! after construction.

mod columns_object;
pub(crate) mod row_builder;
mod rows_array;
mod single_row;

use std::sync::Arc;

use crate::bridge::format::{TableShape, TableType};
use crate::error::{JsonTableError, Result};
use crate::json::{JsonScanner, ValueKind};
use crate::source::{BoxedSource, InputSource};

pub(crate) use row_builder::BatchBuilder;

use columns_object::ColumnsObjectDecoder;
use rows_array::RowsArrayDecoder;
use single_row::SingleRowDecoder;

//==================================================================================
// I. Decoder Contract
//==================================================================================

/// The contract every shape-specific decoder fulfils. The façade drives the
/// state machine; decoders only move their cursor.
pub(crate) trait ShapeDecoder: Send {
    fn shape(&self) -> TableShape;

    /// Positions the source at the start of the data region.
    fn prepare(&mut self) -> Result<()>;

    /// Appends up to `max_rows` rows to `builder` and returns how many were
    /// appended. Zero means the data is exhausted.
    fn next_rows(&mut self, builder: &mut BatchBuilder, max_rows: usize) -> Result<usize>;

    /// Moves the cursor back to the first row without re-resolving.
    fn rewind(&mut self) -> Result<()>;

    /// Whether `rewind` can succeed on the underlying source.
    fn can_rewind(&self) -> bool;
}

//==================================================================================
// II. Factory
//==================================================================================

/// Builds the decoder for `table`'s shape. `columns` lists the columns to
/// materialize, in output order.
pub(crate) fn create_decoder(
    table: &Arc<TableType>,
    source: BoxedSource,
    columns: &[String],
    read_buffer_size: usize,
) -> Result<Box<dyn ShapeDecoder>> {
    let shape = table.shape();
    if shape == TableShape::Unrecognized {
        return Err(JsonTableError::UnsupportedShape(shape));
    }
    let scanner = JsonScanner::new(source, read_buffer_size)
        .map_err(|e| source_unavailable(shape, e.to_string()))?;

    let decoder: Box<dyn ShapeDecoder> = match shape {
        TableShape::RowsArray => Box::new(RowsArrayDecoder::new(table.clone(), scanner)),
        TableShape::ColumnsObject => {
            Box::new(ColumnsObjectDecoder::new(
                table.clone(),
                scanner,
                columns,
                read_buffer_size,
            )?)
        }
        TableShape::SingleRow => Box::new(SingleRowDecoder::new(table.clone(), scanner)),
        TableShape::Unrecognized => return Err(JsonTableError::UnsupportedShape(shape)),
    };
    log::debug!(
        "Created {} decoder for {} columns",
        decoder.shape(),
        columns.len()
    );
    Ok(decoder)
}

//==================================================================================
// III. Shared Helpers
//==================================================================================

pub(crate) fn source_unavailable(shape: TableShape, message: impl Into<String>) -> JsonTableError {
    JsonTableError::SourceUnavailable {
        shape,
        message: message.into(),
    }
}

/// Fails with `NotRewindable` unless the source supports backward seeks.
fn ensure_rewindable<S: InputSource>(scanner: &JsonScanner<S>, shape: TableShape) -> Result<()> {
    if scanner.source().can_seek_backward() {
        Ok(())
    } else {
        Err(JsonTableError::NotRewindable {
            shape,
            message: "the input source only supports forward reads".into(),
        })
    }
}

/// Seeks to the resolved data region, checking it still fits in the source.
fn seek_to_data<S: InputSource>(scanner: &mut JsonScanner<S>, table: &TableType) -> Result<()> {
    let range = table.data_range();
    if !range.fits_within(scanner.len()) {
        return Err(source_unavailable(
            table.shape(),
            format!(
                "data region {} lies beyond the end of the {}-byte input",
                range,
                scanner.len()
            ),
        ));
    }
    scanner
        .seek(range.offset)
        .map_err(|e| source_unavailable(table.shape(), e.to_string()))
}

/// Fails with `SourceUnavailable` if the next token is not `expected`, which
/// means the source no longer holds the resolved document.
fn expect_data_start<S: InputSource>(
    scanner: &mut JsonScanner<S>,
    shape: TableShape,
    expected: ValueKind,
) -> Result<()> {
    match scanner.peek_kind() {
        Ok(Some((kind, _))) if kind == expected => Ok(()),
        Ok(Some((kind, offset))) => Err(source_unavailable(
            shape,
            format!(
                "expected {} at byte {}, found {}; the input differs from the resolved document",
                expected, offset, kind
            ),
        )),
        Ok(None) => Err(source_unavailable(shape, "input ended before the data region")),
        Err(e) => Err(source_unavailable(shape, e.to_string())),
    }
}
