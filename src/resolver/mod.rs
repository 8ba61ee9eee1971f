// In: src/resolver/mod.rs

//! The shape and schema resolver.
//!
//! A single sequential pass over the document classifies its top-level layout
//! and infers a unified schema. For `COLUMNS_OBJECT` documents the same pass
//! records the byte span of every column array.
//!
//! The whole document is always scanned, even once it is known not to be a
//! table, so that malformed input is reported as `MalformedInput` rather than
//! hidden behind `UnrecognizedShape`.

mod schema_builder;

use arrow::datatypes::Schema;
use hashbrown::HashSet;

use crate::bridge::format::{ColumnBoundaries, FileRange, TableShape, TableType};
use crate::config::ResolveOptions;
use crate::error::{JsonTableError, Result};
use crate::json::{JsonScanner, ValueKind};
use crate::source::InputSource;
use crate::types::{is_supported_arrow_type, InferredType};

use schema_builder::SchemaBuilder;

/// Outcome of classifying a fully scanned document.
enum Classification {
    Table {
        shape: TableShape,
        schema: Schema,
        boundaries: ColumnBoundaries,
        num_rows: u64,
    },
    Unrecognized {
        offset: u64,
        reason: String,
    },
}

impl Classification {
    fn unrecognized(offset: u64, reason: impl Into<String>) -> Self {
        Classification::Unrecognized {
            offset,
            reason: reason.into(),
        }
    }
}

/// Resolves the shape, schema and column boundaries of the JSON document in
/// `source`, starting at its current position.
///
/// Fails with `MalformedInput` if the document is not valid JSON, and with
/// `UnrecognizedShape` if it is valid but not a table. On success the
/// source is left positioned after the document.
pub fn resolve_table_type<S: InputSource + ?Sized>(
    source: &mut S,
    options: &ResolveOptions,
) -> Result<TableType> {
    validate_options(options)?;

    let mut scanner = JsonScanner::new(source, options.read_buffer_size)?;
    let Some((kind, start)) = scanner.peek_kind()? else {
        return Err(JsonTableError::unrecognized(
            scanner.position(),
            "input contains no JSON value",
        ));
    };

    let classification = match kind {
        ValueKind::Array => classify_array(&mut scanner, options)?,
        ValueKind::Object => classify_object(&mut scanner, options)?,
        scalar => {
            scanner.skip_value()?;
            Classification::unrecognized(
                start,
                format!("top-level value is a {}, not an array or object", scalar),
            )
        }
    };
    let end = scanner.position();
    scanner.finish()?;

    let (shape, schema, boundaries, num_rows) = match classification {
        Classification::Unrecognized { offset, reason } => {
            log::info!("Document is not a table: {} (byte {})", reason, offset);
            return Err(JsonTableError::unrecognized(offset, reason));
        }
        Classification::Table {
            shape,
            schema,
            boundaries,
            num_rows,
        } => (shape, schema, boundaries, num_rows),
    };

    if let Some(expected) = options.expected_shape {
        if expected != shape {
            return Err(JsonTableError::unrecognized(
                start,
                format!("expected a {} document, found {}", expected, shape),
            ));
        }
    }

    for name in options.type_hints.keys() {
        if schema.field_with_name(name).is_err() {
            log::warn!("Type hint for unknown field '{}' ignored", name);
        }
    }

    log::info!(
        "Resolved {} table: {} columns, {} rows, data at {}",
        shape,
        schema.fields().len(),
        num_rows,
        FileRange::between(start, end)
    );
    log_metric!(
        "event" = "resolved",
        "shape" = &shape,
        "columns" = &schema.fields().len(),
        "rows" = &num_rows,
        "bytes" = &(end - start)
    );

    Ok(TableType::new(
        shape,
        schema,
        boundaries,
        FileRange::between(start, end),
        num_rows,
    ))
}

fn validate_options(options: &ResolveOptions) -> Result<()> {
    if options.max_inference_rows == Some(0) {
        return Err(JsonTableError::InvalidDescriptor(
            "max_inference_rows must be greater than zero".into(),
        ));
    }
    for (name, data_type) in &options.type_hints {
        if !is_supported_arrow_type(data_type) {
            return Err(JsonTableError::InvalidDescriptor(format!(
                "type hint {:?} for field '{}' is not a supported column type",
                data_type, name
            )));
        }
    }
    Ok(())
}

/// Returns `true` while the `index`-th row or element should still feed inference.
fn within_inference_limit(options: &ResolveOptions, index: u64) -> bool {
    options
        .max_inference_rows
        .map_or(true, |max| index < max as u64)
}

/// Returns `true` if `count` rows or elements exceed the inference limit.
fn exceeds_inference_limit(options: &ResolveOptions, count: u64) -> bool {
    options
        .max_inference_rows
        .is_some_and(|max| count > max as u64)
}

//==================================================================================
// I. Top-Level Arrays (ROWS_ARRAY candidates)
//==================================================================================

fn classify_array<S: InputSource>(
    scanner: &mut JsonScanner<S>,
    options: &ResolveOptions,
) -> Result<Classification> {
    let array_start = scanner.begin_array()?;
    let mut builder = SchemaBuilder::for_records(&options.type_hints);
    let mut rejection: Option<Classification> = None;
    let mut rows = 0u64;
    let mut first = true;

    while scanner.next_element(&mut first)? {
        let (kind, offset) = scanner
            .peek_kind()?
            .ok_or_else(|| JsonTableError::malformed(scanner.position(), "unexpected end of input"))?;

        if rejection.is_some() {
            scanner.skip_value()?;
        } else if kind != ValueKind::Object {
            scanner.skip_value()?;
            rejection = Some(Classification::unrecognized(
                offset,
                format!("array element {} is a {}, not an object", rows, kind),
            ));
        } else if within_inference_limit(options, rows) {
            if let Some(duplicate) = observe_record(scanner, &mut builder)? {
                rejection = Some(duplicate);
            }
        } else {
            scanner.skip_value()?;
        }
        rows += 1;
    }

    if let Some(rejection) = rejection {
        return Ok(rejection);
    }
    if rows == 0 {
        return Ok(Classification::unrecognized(array_start, "array is empty"));
    }
    if builder.len() == 0 {
        return Ok(Classification::unrecognized(
            array_start,
            "array elements have no fields",
        ));
    }

    Ok(Classification::Table {
        shape: TableShape::RowsArray,
        schema: builder.finish(exceeds_inference_limit(options, rows)),
        boundaries: ColumnBoundaries::new(),
        num_rows: rows,
    })
}

/// Walks one row object field by field. Returns a rejection if a key repeats.
fn observe_record<S: InputSource>(
    scanner: &mut JsonScanner<S>,
    builder: &mut SchemaBuilder<'_>,
) -> Result<Option<Classification>> {
    scanner.begin_object()?;
    let mut keys: HashSet<String> = HashSet::new();
    let mut rejection = None;
    let mut first = true;
    while let Some((key, offset)) = scanner.next_key(&mut first)? {
        if rejection.is_some() {
            scanner.skip_value()?;
            continue;
        }
        let (value, _) = scanner.parse_value()?;
        if !keys.insert(key.clone()) {
            rejection = Some(Classification::unrecognized(
                offset,
                format!("duplicate key '{}' in row object", key),
            ));
            continue;
        }
        builder.observe(&key, &value);
    }
    builder.end_record();
    Ok(rejection)
}

//==================================================================================
// II. Top-Level Objects (COLUMNS_OBJECT or SINGLE_ROW candidates)
//==================================================================================

fn classify_object<S: InputSource>(
    scanner: &mut JsonScanner<S>,
    options: &ResolveOptions,
) -> Result<Classification> {
    let object_start = scanner.begin_object()?;

    // Both interpretations are built side by side; the shape decides which one wins.
    let mut columns = SchemaBuilder::for_columns(&options.type_hints);
    let mut single_row = SchemaBuilder::for_records(&options.type_hints);
    let mut boundaries = ColumnBoundaries::new();
    let mut keys: HashSet<String> = HashSet::new();
    let mut lengths: Vec<(String, u64)> = Vec::new();
    let mut all_arrays = true;
    let mut partial = false;
    let mut rejection: Option<Classification> = None;
    let mut first = true;

    while let Some((key, key_offset)) = scanner.next_key(&mut first)? {
        let (kind, _) = scanner
            .peek_kind()?
            .ok_or_else(|| JsonTableError::malformed(scanner.position(), "unexpected end of input"))?;

        if rejection.is_some() {
            scanner.skip_value()?;
            continue;
        }
        if !keys.insert(key.clone()) {
            scanner.skip_value()?;
            rejection = Some(Classification::unrecognized(
                key_offset,
                format!("duplicate key '{}' in top-level object", key),
            ));
            continue;
        }

        if kind == ValueKind::Array {
            let (range, len) = observe_column(scanner, &key, &mut columns, options)?;
            partial |= exceeds_inference_limit(options, len);
            single_row.observe_type(&key, InferredType::Nested);
            boundaries.insert(key.clone(), range);
            lengths.push((key, len));
        } else {
            all_arrays = false;
            let (value, _) = scanner.parse_value()?;
            single_row.observe(&key, &value);
        }
    }
    single_row.end_record();

    if let Some(rejection) = rejection {
        return Ok(rejection);
    }
    if keys.is_empty() {
        return Ok(Classification::unrecognized(object_start, "object has no fields"));
    }

    if !all_arrays {
        return Ok(Classification::Table {
            shape: TableShape::SingleRow,
            schema: single_row.finish(false),
            boundaries: ColumnBoundaries::new(),
            num_rows: 1,
        });
    }

    let num_rows = lengths[0].1;
    if let Some((name, len)) = lengths.iter().find(|(_, len)| *len != num_rows) {
        return Ok(Classification::unrecognized(
            object_start,
            format!(
                "column arrays have unequal lengths ('{}' has {}, '{}' has {})",
                lengths[0].0, num_rows, name, len
            ),
        ));
    }

    Ok(Classification::Table {
        shape: TableShape::ColumnsObject,
        schema: columns.finish(partial),
        boundaries,
        num_rows,
    })
}

/// Walks one column array element by element. Returns the array's span and length.
fn observe_column<S: InputSource>(
    scanner: &mut JsonScanner<S>,
    name: &str,
    builder: &mut SchemaBuilder<'_>,
    options: &ResolveOptions,
) -> Result<(FileRange, u64)> {
    let start = scanner.begin_array()?;
    builder.declare(name);
    let mut len = 0u64;
    let mut first = true;
    while scanner.next_element(&mut first)? {
        if within_inference_limit(options, len) {
            let (value, _) = scanner.parse_value()?;
            builder.observe(name, &value);
        } else {
            scanner.skip_value()?;
        }
        len += 1;
    }
    Ok((FileRange::between(start, scanner.position()), len))
}
