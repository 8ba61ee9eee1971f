// In: src/shapes/columns_object.rs

use std::sync::Arc;

use serde_json::Value;

use super::{ensure_rewindable, source_unavailable, BatchBuilder, ShapeDecoder};
use crate::bridge::format::{FileRange, TableShape, TableType};
use crate::error::{JsonTableError, Result};
use crate::json::JsonScanner;
use crate::source::{BoxedSource, ReadWindow};

/// Read position inside one column array.
struct ColumnCursor {
    name: String,
    range: FileRange,
    /// Buffered bytes of this column, parked while other columns are read.
    /// Refills stop at the end of `range`.
    window: ReadWindow,
    /// Whether the opening `[` has been consumed.
    started: bool,
    first: bool,
}

impl ColumnCursor {
    fn reset(&mut self) {
        self.window.reset(self.range.offset, self.range.end());
        self.started = false;
        self.first = true;
    }
}

/// Decodes `{"a": [...], "b": [...]}`. All projected columns advance in
/// lockstep on a shared row index; each column is located through the
/// boundary index and read through its own window, so interleaving columns
/// never re-reads bytes. Columns outside the projection are never read.
pub(crate) struct ColumnsObjectDecoder {
    table: Arc<TableType>,
    scanner: JsonScanner<BoxedSource>,
    columns: Vec<ColumnCursor>,
    next_row: u64,
    /// Per-column values of the batch being assembled.
    staged: Vec<Vec<(Value, u64)>>,
    row: Vec<(Value, u64)>,
}

impl ColumnsObjectDecoder {
    pub fn new(
        table: Arc<TableType>,
        scanner: JsonScanner<BoxedSource>,
        projection: &[String],
        read_buffer_size: usize,
    ) -> Result<Self> {
        let columns = projection
            .iter()
            .map(|name| {
                let range = table.column_boundaries().get(name).ok_or_else(|| {
                    JsonTableError::InvalidDescriptor(format!(
                        "column '{}' has no byte range in the boundary index",
                        name
                    ))
                })?;
                let window_size = usize::try_from(range.size)
                    .map_or(read_buffer_size, |size| size.min(read_buffer_size));
                Ok(ColumnCursor {
                    name: name.clone(),
                    range,
                    window: ReadWindow::new(window_size, range.offset, range.end()),
                    started: false,
                    first: true,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            staged: columns.iter().map(|_| Vec::new()).collect(),
            row: Vec::with_capacity(columns.len()),
            table,
            scanner,
            columns,
            next_row: 0,
        })
    }

    /// Reads the next `count` elements of column `index` into `staged`.
    fn pull_column(&mut self, index: usize, count: usize) -> Result<()> {
        let column = &mut self.columns[index];
        let staged = &mut self.staged[index];
        staged.clear();

        self.scanner.swap_window(&mut column.window);
        let pulled = read_elements(
            &mut self.scanner,
            column,
            staged,
            count,
            self.next_row,
            self.table.num_rows(),
        );
        self.scanner.swap_window(&mut column.window);
        pulled
    }
}

/// Reads `count` elements of `column` through the scanner's active window.
fn read_elements(
    scanner: &mut JsonScanner<BoxedSource>,
    column: &mut ColumnCursor,
    staged: &mut Vec<(Value, u64)>,
    count: usize,
    next_row: u64,
    num_rows: u64,
) -> Result<()> {
    if !column.started {
        log::debug!(
            "Reading column '{}' from byte range {}",
            column.name,
            column.range
        );
        scanner.begin_array()?;
        column.started = true;
    }

    for _ in 0..count {
        if !scanner.next_element(&mut column.first)? {
            return Err(JsonTableError::unrecognized(
                scanner.position(),
                format!(
                    "column '{}' ended before row {} of {}",
                    column.name,
                    next_row + staged.len() as u64,
                    num_rows
                ),
            ));
        }
        let (value, range) = scanner.parse_value()?;
        staged.push((value, range.offset));
    }
    Ok(())
}

impl ShapeDecoder for ColumnsObjectDecoder {
    fn shape(&self) -> TableShape {
        TableShape::ColumnsObject
    }

    fn prepare(&mut self) -> Result<()> {
        if !self.scanner.source().can_seek_backward() {
            return Err(source_unavailable(
                TableShape::ColumnsObject,
                "column-wise reads need a source that can seek backward",
            ));
        }
        let len = self.scanner.len();
        if let Some(column) = self.columns.iter().find(|c| !c.range.fits_within(len)) {
            return Err(source_unavailable(
                TableShape::ColumnsObject,
                format!(
                    "column '{}' span {} lies beyond the end of the {}-byte input",
                    column.name, column.range, len
                ),
            ));
        }
        self.columns.iter_mut().for_each(ColumnCursor::reset);
        self.next_row = 0;
        Ok(())
    }

    fn next_rows(&mut self, builder: &mut BatchBuilder, max_rows: usize) -> Result<usize> {
        let remaining = self.table.num_rows() - self.next_row;
        let count = remaining.min(max_rows as u64) as usize;
        if count == 0 {
            return Ok(0);
        }

        for index in 0..self.columns.len() {
            self.pull_column(index, count)?;
        }

        for offset in 0..count {
            self.row.clear();
            for staged in &mut self.staged {
                self.row.push(std::mem::take(&mut staged[offset]));
            }
            builder.append_values(&self.row, self.next_row + offset as u64)?;
        }
        self.next_row += count as u64;
        Ok(count)
    }

    fn rewind(&mut self) -> Result<()> {
        ensure_rewindable(&self.scanner, TableShape::ColumnsObject)?;
        self.prepare()
    }

    fn can_rewind(&self) -> bool {
        self.scanner.source().can_seek_backward()
    }
}
