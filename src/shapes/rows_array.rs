// In: src/shapes/rows_array.rs

use std::sync::Arc;

use serde_json::Value;

use super::{ensure_rewindable, expect_data_start, seek_to_data, BatchBuilder, ShapeDecoder};
use crate::bridge::format::{TableShape, TableType};
use crate::error::{JsonTableError, Result};
use crate::json::{JsonScanner, ValueKind};
use crate::source::BoxedSource;

/// Decodes `[{...}, {...}]`. The cursor is the index of the next array element.
pub(crate) struct RowsArrayDecoder {
    table: Arc<TableType>,
    scanner: JsonScanner<BoxedSource>,
    next_row: u64,
    first: bool,
    exhausted: bool,
}

impl RowsArrayDecoder {
    pub fn new(table: Arc<TableType>, scanner: JsonScanner<BoxedSource>) -> Self {
        Self {
            table,
            scanner,
            next_row: 0,
            first: true,
            exhausted: false,
        }
    }
}

impl ShapeDecoder for RowsArrayDecoder {
    fn shape(&self) -> TableShape {
        TableShape::RowsArray
    }

    fn prepare(&mut self) -> Result<()> {
        seek_to_data(&mut self.scanner, &self.table)?;
        expect_data_start(&mut self.scanner, TableShape::RowsArray, ValueKind::Array)?;
        self.scanner.begin_array()?;
        self.next_row = 0;
        self.first = true;
        self.exhausted = false;
        Ok(())
    }

    fn next_rows(&mut self, builder: &mut BatchBuilder, max_rows: usize) -> Result<usize> {
        let mut appended = 0;
        while appended < max_rows && !self.exhausted {
            if !self.scanner.next_element(&mut self.first)? {
                self.exhausted = true;
                break;
            }
            let (value, range) = self.scanner.parse_value()?;
            match value {
                Value::Object(record) => {
                    builder.append_record(&record, self.next_row, range.offset)?
                }
                other => {
                    return Err(JsonTableError::unrecognized(
                        range.offset,
                        format!(
                            "row {} is a {}, not an object",
                            self.next_row,
                            ValueKind::of(&other)
                        ),
                    ))
                }
            }
            self.next_row += 1;
            appended += 1;
        }
        Ok(appended)
    }

    fn rewind(&mut self) -> Result<()> {
        ensure_rewindable(&self.scanner, TableShape::RowsArray)?;
        self.prepare()
    }

    fn can_rewind(&self) -> bool {
        self.scanner.source().can_seek_backward()
    }
}
