// In: src/shapes/row_builder.rs

//! Accumulates decoded rows into Arrow column builders.
//!
//! Every cell of a row is checked against its column before any builder is
//! touched, so a `SchemaViolation` never leaves a half-appended row behind.
//! Values are never coerced: a string is not a number, `1.5` is not an
//! integer, and an out-of-range integer is a violation.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float32Builder, Float64Builder, Int16Builder, Int32Builder,
    Int64Builder, Int8Builder, LargeStringBuilder, StringBuilder, UInt16Builder, UInt32Builder,
    UInt64Builder, UInt8Builder,
};
use arrow::datatypes::{DataType, Field, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde_json::{Map, Value};

use crate::error::{JsonTableError, Result};
use crate::json::ValueKind;
use crate::types::is_json_encoded_field;

/// Upper bound on rows pre-allocated per builder; larger batches grow on demand.
const MAX_PREALLOCATED_ROWS: usize = 64 * 1024;

/// A value that has passed the column's compatibility check.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

enum ColumnBuilder {
    Boolean(BooleanBuilder),
    Int8(Int8Builder),
    Int16(Int16Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    UInt8(UInt8Builder),
    UInt16(UInt16Builder),
    UInt32(UInt32Builder),
    UInt64(UInt64Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Utf8(StringBuilder),
    LargeUtf8(LargeStringBuilder),
    /// A `Utf8` column holding the compact JSON text of arbitrary values.
    Json(StringBuilder),
}

/// Runs `$body` with `$b` bound to the inner Arrow builder, whatever its type.
macro_rules! with_builder {
    ($column:expr, $b:ident => $body:expr) => {
        match $column {
            ColumnBuilder::Boolean($b) => $body,
            ColumnBuilder::Int8($b) => $body,
            ColumnBuilder::Int16($b) => $body,
            ColumnBuilder::Int32($b) => $body,
            ColumnBuilder::Int64($b) => $body,
            ColumnBuilder::UInt8($b) => $body,
            ColumnBuilder::UInt16($b) => $body,
            ColumnBuilder::UInt32($b) => $body,
            ColumnBuilder::UInt64($b) => $body,
            ColumnBuilder::Float32($b) => $body,
            ColumnBuilder::Float64($b) => $body,
            ColumnBuilder::Utf8($b) => $body,
            ColumnBuilder::LargeUtf8($b) => $body,
            ColumnBuilder::Json($b) => $body,
        }
    };
}

fn signed_in<T: TryFrom<i64>>(value: &Value) -> Option<Cell> {
    value
        .as_i64()
        .filter(|v| T::try_from(*v).is_ok())
        .map(Cell::Int)
}

fn unsigned_in<T: TryFrom<u64>>(value: &Value) -> Option<Cell> {
    value
        .as_u64()
        .filter(|v| T::try_from(*v).is_ok())
        .map(Cell::UInt)
}

impl ColumnBuilder {
    fn try_new(field: &Field, capacity: usize) -> Result<Self> {
        if is_json_encoded_field(field) && *field.data_type() == DataType::Utf8 {
            let text_bytes = capacity.saturating_mul(16);
            return Ok(Self::Json(StringBuilder::with_capacity(capacity, text_bytes)));
        }
        let builder = match field.data_type() {
            DataType::Boolean => Self::Boolean(BooleanBuilder::with_capacity(capacity)),
            DataType::Int8 => Self::Int8(Int8Builder::with_capacity(capacity)),
            DataType::Int16 => Self::Int16(Int16Builder::with_capacity(capacity)),
            DataType::Int32 => Self::Int32(Int32Builder::with_capacity(capacity)),
            DataType::Int64 => Self::Int64(Int64Builder::with_capacity(capacity)),
            DataType::UInt8 => Self::UInt8(UInt8Builder::with_capacity(capacity)),
            DataType::UInt16 => Self::UInt16(UInt16Builder::with_capacity(capacity)),
            DataType::UInt32 => Self::UInt32(UInt32Builder::with_capacity(capacity)),
            DataType::UInt64 => Self::UInt64(UInt64Builder::with_capacity(capacity)),
            DataType::Float32 => Self::Float32(Float32Builder::with_capacity(capacity)),
            DataType::Float64 => Self::Float64(Float64Builder::with_capacity(capacity)),
            DataType::Utf8 => {
                Self::Utf8(StringBuilder::with_capacity(capacity, capacity.saturating_mul(8)))
            }
            DataType::LargeUtf8 => {
                Self::LargeUtf8(LargeStringBuilder::with_capacity(
                    capacity,
                    capacity.saturating_mul(8),
                ))
            }
            other => {
                return Err(JsonTableError::InvalidDescriptor(format!(
                    "column '{}' has unsupported type {}",
                    field.name(),
                    other
                )))
            }
        };
        Ok(builder)
    }

    /// Checks a non-null value against the column type.
    fn decode(&self, value: &Value) -> Option<Cell> {
        match self {
            Self::Boolean(_) => value.as_bool().map(Cell::Bool),
            Self::Int8(_) => signed_in::<i8>(value),
            Self::Int16(_) => signed_in::<i16>(value),
            Self::Int32(_) => signed_in::<i32>(value),
            Self::Int64(_) => signed_in::<i64>(value),
            Self::UInt8(_) => unsigned_in::<u8>(value),
            Self::UInt16(_) => unsigned_in::<u16>(value),
            Self::UInt32(_) => unsigned_in::<u32>(value),
            Self::UInt64(_) => unsigned_in::<u64>(value),
            Self::Float32(_) => value
                .as_f64()
                .filter(|v| v.abs() <= f32::MAX as f64)
                .map(Cell::Float),
            Self::Float64(_) => value.as_f64().map(Cell::Float),
            Self::Utf8(_) | Self::LargeUtf8(_) => {
                value.as_str().map(|s| Cell::Text(s.to_owned()))
            }
            Self::Json(_) => Some(Cell::Text(value.to_string())),
        }
    }

    fn append(&mut self, cell: &Cell) -> Result<()> {
        match (self, cell) {
            (builder, Cell::Null) => with_builder!(builder, b => b.append_null()),
            (Self::Boolean(b), Cell::Bool(v)) => b.append_value(*v),
            (Self::Int8(b), Cell::Int(v)) => b.append_value(*v as i8),
            (Self::Int16(b), Cell::Int(v)) => b.append_value(*v as i16),
            (Self::Int32(b), Cell::Int(v)) => b.append_value(*v as i32),
            (Self::Int64(b), Cell::Int(v)) => b.append_value(*v),
            (Self::UInt8(b), Cell::UInt(v)) => b.append_value(*v as u8),
            (Self::UInt16(b), Cell::UInt(v)) => b.append_value(*v as u16),
            (Self::UInt32(b), Cell::UInt(v)) => b.append_value(*v as u32),
            (Self::UInt64(b), Cell::UInt(v)) => b.append_value(*v),
            (Self::Float32(b), Cell::Float(v)) => b.append_value(*v as f32),
            (Self::Float64(b), Cell::Float(v)) => b.append_value(*v),
            (Self::Utf8(b) | Self::Json(b), Cell::Text(v)) => b.append_value(v),
            (Self::LargeUtf8(b), Cell::Text(v)) => b.append_value(v),
            (_, cell) => {
                return Err(JsonTableError::InternalError(format!(
                    "decoded cell {:?} does not match its column builder",
                    cell
                )))
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        with_builder!(self, b => Arc::new(b.finish()) as ArrayRef)
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Number(n) => format!("number {}", n),
        Value::String(s) if s.chars().count() <= 32 => format!("string \"{}\"", s),
        other => ValueKind::of(other).to_string(),
    }
}

struct ColumnSlot {
    name: String,
    data_type: DataType,
    nullable: bool,
    builder: ColumnBuilder,
}

impl ColumnSlot {
    fn decode(&self, value: Option<&Value>, row: u64, offset: u64) -> Result<Cell> {
        let violation = |found: String| JsonTableError::SchemaViolation {
            column: self.name.clone(),
            row,
            offset,
            expected: if self.nullable {
                format!("nullable {}", self.data_type)
            } else {
                self.data_type.to_string()
            },
            found,
        };
        match value {
            None if self.nullable => Ok(Cell::Null),
            None => Err(violation("missing field".into())),
            Some(Value::Null) if self.nullable => Ok(Cell::Null),
            Some(v) => self.builder.decode(v).ok_or_else(|| violation(describe(v))),
        }
    }
}

/// Builds one `RecordBatch` at a time for a fixed (possibly projected) schema.
pub(crate) struct BatchBuilder {
    schema: SchemaRef,
    slots: Vec<ColumnSlot>,
    pending: Vec<Cell>,
    rows: usize,
}

impl BatchBuilder {
    /// `capacity` is a hint for the expected rows per batch.
    pub fn try_new(schema: SchemaRef, capacity: usize) -> Result<Self> {
        let capacity = capacity.min(MAX_PREALLOCATED_ROWS);
        let slots = schema
            .fields()
            .iter()
            .map(|field| {
                Ok(ColumnSlot {
                    name: field.name().clone(),
                    data_type: field.data_type().clone(),
                    nullable: field.is_nullable(),
                    builder: ColumnBuilder::try_new(field, capacity)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            pending: Vec::with_capacity(slots.len()),
            schema,
            slots,
            rows: 0,
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Names of the columns being built, in output order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.name.as_str())
    }

    /// Rows appended since the last `finish` or `reset`.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Appends one row object. Fields absent from the record become null;
    /// fields outside the schema are ignored.
    pub fn append_record(&mut self, record: &Map<String, Value>, row: u64, offset: u64) -> Result<()> {
        self.pending.clear();
        for slot in &self.slots {
            let cell = slot.decode(record.get(&slot.name), row, offset)?;
            self.pending.push(cell);
        }
        self.commit()
    }

    /// Appends one row given as one `(value, byte offset)` pair per column, in column order.
    pub fn append_values(&mut self, values: &[(Value, u64)], row: u64) -> Result<()> {
        if values.len() != self.slots.len() {
            return Err(JsonTableError::InternalError(format!(
                "row has {} values for {} columns",
                values.len(),
                self.slots.len()
            )));
        }
        self.pending.clear();
        for (slot, (value, offset)) in self.slots.iter().zip(values) {
            let cell = slot.decode(Some(value), row, *offset)?;
            self.pending.push(cell);
        }
        self.commit()
    }

    fn commit(&mut self) -> Result<()> {
        for (slot, cell) in self.slots.iter_mut().zip(self.pending.drain(..)) {
            slot.builder.append(&cell)?;
        }
        self.rows += 1;
        Ok(())
    }

    /// Emits the accumulated rows as a batch and empties the builders.
    pub fn finish(&mut self) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = self
            .slots
            .iter_mut()
            .map(|slot| slot.builder.finish())
            .collect();
        self.rows = 0;
        Ok(RecordBatch::try_new(self.schema.clone(), columns)?)
    }

    /// Discards any rows appended since the last `finish`.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.builder.finish();
        }
        self.rows = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ENCODING_METADATA_KEY, JSON_ENCODING};
    use arrow::array::{Array, Int32Array, Int64Array, StringArray};
    use arrow::datatypes::Schema;
    use serde_json::json;
    use std::collections::HashMap;

    fn builder(fields: Vec<Field>) -> BatchBuilder {
        BatchBuilder::try_new(Arc::new(Schema::new(fields)), 4).unwrap()
    }

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_missing_fields_become_null() {
        let mut b = builder(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Utf8, true),
        ]);
        b.append_record(&record(json!({"a": 1, "b": "x"})), 0, 1).unwrap();
        b.append_record(&record(json!({"a": 2, "extra": true})), 1, 20).unwrap();

        let batch = b.finish().unwrap();
        assert_eq!(batch.num_rows(), 2);
        let names = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "x");
        assert!(names.is_null(1));
        assert!(b.is_empty());
    }

    #[test]
    fn test_violation_leaves_no_partial_row() {
        // Arrange
        let mut b = builder(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Int64, false),
        ]);
        b.append_record(&record(json!({"a": 1, "b": 2})), 0, 1).unwrap();

        // Act: "a" is fine, "b" is not.
        let err = b
            .append_record(&record(json!({"a": 3, "b": "oops"})), 1, 17)
            .unwrap_err();

        // Assert
        match err {
            JsonTableError::SchemaViolation {
                column,
                row,
                offset,
                found,
                ..
            } => {
                assert_eq!(column, "b");
                assert_eq!(row, 1);
                assert_eq!(offset, 17);
                assert!(found.contains("oops"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        let batch = b.finish().unwrap();
        assert_eq!(batch.num_rows(), 1);
        let a = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(a.values(), &[1]);
    }

    #[test]
    fn test_no_coercion() {
        let mut b = builder(vec![Field::new("i", DataType::Int64, true)]);
        for bad in [json!(1.5), json!("1"), json!(true), json!(1e30)] {
            assert!(b.append_record(&record(json!({ "i": bad })), 0, 0).is_err());
        }
        assert!(b.is_empty());
    }

    #[test]
    fn test_null_in_non_nullable_column() {
        let mut b = builder(vec![Field::new("a", DataType::Boolean, false)]);
        let err = b.append_record(&record(json!({"a": null})), 4, 9).unwrap_err();
        assert!(matches!(err, JsonTableError::SchemaViolation { row: 4, .. }));
    }

    #[test]
    fn test_narrow_hinted_types_check_range() {
        let mut b = builder(vec![Field::new("n", DataType::Int32, false)]);
        b.append_values(&[(json!(7), 0)], 0).unwrap();
        assert!(b.append_values(&[(json!(i64::MAX), 3)], 1).is_err());
        let batch = b.finish().unwrap();
        let n = batch.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(n.values(), &[7]);
    }

    #[test]
    fn test_json_encoded_column_stores_text() {
        let field = Field::new("v", DataType::Utf8, true).with_metadata(HashMap::from([(
            ENCODING_METADATA_KEY.to_string(),
            JSON_ENCODING.to_string(),
        )]));
        let mut b = builder(vec![field]);
        b.append_values(&[(json!({"k": [1, 2]}), 0)], 0).unwrap();
        b.append_values(&[(json!("s"), 0)], 1).unwrap();
        b.append_values(&[(json!(null), 0)], 2).unwrap();

        let batch = b.finish().unwrap();
        let v = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(v.value(0), r#"{"k":[1,2]}"#);
        assert_eq!(v.value(1), r#""s""#);
        assert!(v.is_null(2));
        assert!(batch.schema().field(0).metadata().contains_key(ENCODING_METADATA_KEY));
    }

    #[test]
    fn test_reset_discards_pending_rows() {
        let mut b = builder(vec![Field::new("a", DataType::Float64, false)]);
        b.append_values(&[(json!(1), 0)], 0).unwrap();
        b.reset();
        b.append_values(&[(json!(2.5), 0)], 0).unwrap();
        let batch = b.finish().unwrap();
        assert_eq!(batch.num_rows(), 1);
    }

    #[test]
    fn test_oversized_capacity_hint_is_clamped() {
        // Arrange
        let json_field = Field::new("j", DataType::Utf8, true).with_metadata(HashMap::from([(
            ENCODING_METADATA_KEY.to_string(),
            JSON_ENCODING.to_string(),
        )]));
        let schema = Arc::new(Schema::new(vec![
            Field::new("s", DataType::Utf8, false),
            Field::new("l", DataType::LargeUtf8, false),
            json_field,
        ]));

        // Act
        let mut b = BatchBuilder::try_new(schema, usize::MAX).unwrap();
        b.append_values(&[(json!("x"), 0), (json!("y"), 0), (json!([1]), 0)], 0)
            .unwrap();

        // Assert
        assert_eq!(b.finish().unwrap().num_rows(), 1);
    }
}
