// In: src/shapes/single_row.rs

use std::sync::Arc;

use serde_json::Value;

use super::{ensure_rewindable, expect_data_start, seek_to_data, BatchBuilder, ShapeDecoder};
use crate::bridge::format::{TableShape, TableType};
use crate::error::{JsonTableError, Result};
use crate::json::{JsonScanner, ValueKind};
use crate::source::BoxedSource;

/// Decodes a top-level object as exactly one row, whatever the batch size.
pub(crate) struct SingleRowDecoder {
    table: Arc<TableType>,
    scanner: JsonScanner<BoxedSource>,
    emitted: bool,
}

impl SingleRowDecoder {
    pub fn new(table: Arc<TableType>, scanner: JsonScanner<BoxedSource>) -> Self {
        Self {
            table,
            scanner,
            emitted: false,
        }
    }
}

impl ShapeDecoder for SingleRowDecoder {
    fn shape(&self) -> TableShape {
        TableShape::SingleRow
    }

    fn prepare(&mut self) -> Result<()> {
        seek_to_data(&mut self.scanner, &self.table)?;
        expect_data_start(&mut self.scanner, TableShape::SingleRow, ValueKind::Object)?;
        self.emitted = false;
        Ok(())
    }

    fn next_rows(&mut self, builder: &mut BatchBuilder, max_rows: usize) -> Result<usize> {
        if self.emitted || max_rows == 0 {
            return Ok(0);
        }
        let (value, range) = self.scanner.parse_value()?;
        let Value::Object(record) = value else {
            return Err(JsonTableError::unrecognized(
                range.offset,
                "top-level value is no longer an object",
            ));
        };
        builder.append_record(&record, 0, range.offset)?;
        self.emitted = true;
        Ok(1)
    }

    fn rewind(&mut self) -> Result<()> {
        ensure_rewindable(&self.scanner, TableShape::SingleRow)?;
        self.prepare()
    }

    fn can_rewind(&self) -> bool {
        self.scanner.source().can_seek_backward()
    }
}
