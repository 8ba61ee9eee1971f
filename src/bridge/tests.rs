use super::*;
use crate::config::{ReaderOptions, ResolveOptions};
use crate::error::JsonTableError;
use crate::source::{ForwardOnlySource, InputSource};
use arrow::array::{Array, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn cursor(json: &str) -> Cursor<Vec<u8>> {
    Cursor::new(json.as_bytes().to_vec())
}

fn resolve_str(json: &str) -> TableType {
    resolve_table_type(&mut cursor(json), &ResolveOptions::default()).unwrap()
}

/// Resolves `json` and returns a prepared reader over a fresh copy of it.
fn prepared_reader(json: &str, batch_size: usize) -> TableReader {
    let table = resolve_str(json);
    let mut reader = TableReader::resolve(cursor(json), table, batch_size).unwrap();
    reader.prepare().unwrap();
    reader
}

/// Counts every byte read from the wrapped buffer.
struct CountingSource {
    inner: Cursor<Vec<u8>>,
    bytes_read: Arc<AtomicU64>,
}

impl CountingSource {
    fn new(json: &str) -> (Self, Arc<AtomicU64>) {
        let bytes_read = Arc::new(AtomicU64::new(0));
        let source = Self {
            inner: cursor(json),
            bytes_read: bytes_read.clone(),
        };
        (source, bytes_read)
    }
}

impl Read for CountingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

impl Seek for CountingSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl InputSource for CountingSource {
    fn size(&mut self) -> io::Result<u64> {
        self.inner.size()
    }
}

fn drain(reader: &mut TableReader) -> Vec<RecordBatch> {
    let mut batches = Vec::new();
    while let Some(batch) = reader.next_batch().unwrap() {
        batches.push(batch);
    }
    batches
}

fn int_values(batch: &RecordBatch, column: usize) -> Vec<Option<i64>> {
    let array = batch
        .column(column)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    array.iter().collect()
}

fn str_values(batch: &RecordBatch, column: usize) -> Vec<Option<String>> {
    let array = batch
        .column(column)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    array.iter().map(|v| v.map(str::to_string)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    //==============================================================================
    // I. Shapes End To End
    //==============================================================================

    #[test]
    fn test_rows_array_reads_rows_in_order() {
        // Arrange
        let mut reader = prepared_reader(r#"[{"a":1,"b":"x"},{"a":2}]"#, 1024);

        // Act
        let batches = drain(&mut reader);

        // Assert
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(int_values(batch, 0), vec![Some(1), Some(2)]);
        assert_eq!(str_values(batch, 1), vec![Some("x".to_string()), None]);
        assert_eq!(reader.state(), ReaderState::Exhausted);
        assert_eq!(reader.rows_read(), 2);
    }

    #[test]
    fn test_columns_object_reads_in_lockstep() {
        let mut reader = prepared_reader(r#"{"a":[1,2,3],"b":["x","y","z"]}"#, 2);
        let batches = drain(&mut reader);

        assert_eq!(batches.iter().map(|b| b.num_rows()).collect::<Vec<_>>(), vec![2, 1]);
        let all = concat_batches(&reader.schema(), &batches).unwrap();
        assert_eq!(int_values(&all, 0), vec![Some(1), Some(2), Some(3)]);
        assert_eq!(
            str_values(&all, 1),
            vec![Some("x".into()), Some("y".into()), Some("z".into())]
        );
    }

    #[test]
    fn test_single_row_yields_exactly_one_row() {
        let json = r#"{"id": 7, "tags": ["a", "b"], "ok": true}"#;
        for batch_size in [1, 2, 1024] {
            let mut reader = prepared_reader(json, batch_size);
            let batches = drain(&mut reader);
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].num_rows(), 1);
            assert_eq!(str_values(&batches[0], 1), vec![Some(r#"["a","b"]"#.to_string())]);
            let ok = batches[0]
                .column(2)
                .as_any()
                .downcast_ref::<BooleanArray>()
                .unwrap();
            assert!(ok.value(0));
        }
    }

    #[test]
    fn test_one_batch_boundary_per_batch_size_rows() {
        let rows: Vec<Value> = (0..10).map(|i| json!({ "i": i })).collect();
        let json = serde_json::to_string(&rows).unwrap();
        let mut reader = prepared_reader(&json, 3);

        let sizes: Vec<usize> = drain(&mut reader).iter().map(|b| b.num_rows()).collect();

        assert_eq!(sizes, vec![3, 3, 3, 1]);
        // Further pulls keep reporting end of data.
        assert!(reader.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_zero_row_columns_table() {
        let mut reader = prepared_reader(r#"{"a": [], "b": []}"#, 8);
        assert!(reader.next_batch().unwrap().is_none());
        assert_eq!(reader.state(), ReaderState::Exhausted);
    }

    //==============================================================================
    // II. Rewind
    //==============================================================================

    #[test]
    fn test_rewind_reproduces_identical_batches() {
        let documents = [
            r#"[{"a":1,"b":"x"},{"a":2},{"a":3,"b":"z"},{"a":4}]"#,
            r#"{"a":[1,2,3,4,5],"b":[true,false,null,true,false]}"#,
            r#"{"a":1,"b":{"nested":[1,2]}}"#,
        ];
        for json in documents {
            // Arrange
            let mut reader = prepared_reader(json, 2);
            let first_pass = drain(&mut reader);

            // Act
            reader.rewind().unwrap();
            assert_eq!(reader.state(), ReaderState::Prepared);
            assert_eq!(reader.rows_read(), 0);
            let second_pass = drain(&mut reader);

            // Assert
            assert_eq!(first_pass, second_pass, "document {}", json);
        }
    }

    #[test]
    fn test_rewind_mid_stream() {
        let mut reader = prepared_reader(r#"{"a":[1,2,3,4,5]}"#, 2);
        let first = reader.next_batch().unwrap().unwrap();
        reader.next_batch().unwrap().unwrap();
        reader.rewind().unwrap();
        assert_eq!(reader.next_batch().unwrap().unwrap(), first);
    }

    #[test]
    fn test_forward_only_source_is_not_rewindable() {
        // Arrange: resolve once on a seekable copy, read through a stream.
        let json = r#"[{"a": 1}, {"a": 2}]"#;
        let table = resolve_str(json);
        let bytes = json.as_bytes().to_vec();
        let stream = ForwardOnlySource::new(Cursor::new(bytes.clone()), bytes.len() as u64);
        let mut reader = TableReader::resolve(stream, table, 16).unwrap();
        reader.prepare().unwrap();
        let batches = drain(&mut reader);
        assert_eq!(batches[0].num_rows(), 2);

        // Act
        let err = reader.rewind().unwrap_err();

        // Assert
        assert!(matches!(
            err,
            JsonTableError::NotRewindable {
                shape: TableShape::RowsArray,
                ..
            }
        ));
        assert_eq!(reader.state(), ReaderState::Exhausted);
    }

    #[test]
    fn test_columns_reader_needs_seekable_source() {
        let json = r#"{"a": [1, 2], "b": [3, 4]}"#;
        let table = resolve_str(json);
        let bytes = json.as_bytes().to_vec();
        let stream = ForwardOnlySource::new(Cursor::new(bytes.clone()), bytes.len() as u64);
        let mut reader = TableReader::resolve(stream, table, 16).unwrap();
        assert!(matches!(
            reader.prepare(),
            Err(JsonTableError::SourceUnavailable { .. })
        ));
        assert_eq!(reader.state(), ReaderState::Created);
    }

    //==============================================================================
    // III. Errors and State Machine
    //==============================================================================

    #[test]
    fn test_schema_violation_fails_only_the_current_pull() {
        // Arrange: the hint pins "a" to Int64, so the string in row 2 is a violation.
        let json = r#"[{"a": 1}, {"a": 2}, {"a": "three"}, {"a": 4}]"#;
        let options = ResolveOptions::default().with_type_hint("a", DataType::Int64);
        let table = resolve_table_type(&mut cursor(json), &options).unwrap();
        let mut reader = TableReader::resolve(cursor(json), table, 2).unwrap();
        reader.prepare().unwrap();

        // Act
        let first = reader.next_batch().unwrap().unwrap();
        let err = reader.next_batch().unwrap_err();

        // Assert
        assert_eq!(int_values(&first, 0), vec![Some(1), Some(2)]);
        match err {
            JsonTableError::SchemaViolation {
                column, row, offset, ..
            } => {
                assert_eq!(column, "a");
                assert_eq!(row, 2);
                assert_eq!(offset, 21);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(reader.state(), ReaderState::Failed);
        assert!(matches!(
            reader.next_batch(),
            Err(JsonTableError::InvalidState(_))
        ));

        // Rewinding recovers the earlier batches.
        reader.rewind().unwrap();
        assert_eq!(reader.next_batch().unwrap().unwrap(), first);
    }

    #[test]
    fn test_columns_violation_emits_no_partial_row() {
        let json = r#"{"a": [1, 2, 3], "b": [1, "x", 3]}"#;
        let options = ResolveOptions::default().with_type_hint("b", DataType::Int64);
        let table = resolve_table_type(&mut cursor(json), &options).unwrap();
        let mut reader = TableReader::resolve(cursor(json), table, 1).unwrap();
        reader.prepare().unwrap();

        assert_eq!(reader.next_batch().unwrap().unwrap().num_rows(), 1);
        assert!(matches!(
            reader.next_batch(),
            Err(JsonTableError::SchemaViolation { row: 1, .. })
        ));
        assert_eq!(reader.rows_read(), 1);
    }

    #[test]
    fn test_out_of_order_calls_are_invalid_state() {
        let json = r#"[{"a": 1}]"#;
        let mut reader = TableReader::resolve(cursor(json), resolve_str(json), 4).unwrap();

        assert!(matches!(reader.next_batch(), Err(JsonTableError::InvalidState(_))));
        assert!(matches!(reader.rewind(), Err(JsonTableError::InvalidState(_))));
        reader.prepare().unwrap();
        assert!(matches!(reader.prepare(), Err(JsonTableError::InvalidState(_))));
    }

    #[test]
    fn test_unrecognized_table_is_unsupported() {
        let table = TableType::new(
            TableShape::Unrecognized,
            Schema::new(vec![Field::new("a", DataType::Int64, true)]),
            ColumnBoundaries::new(),
            FileRange::default(),
            0,
        );
        assert!(matches!(
            TableReader::resolve(cursor("42"), table, 8),
            Err(JsonTableError::UnsupportedShape(TableShape::Unrecognized))
        ));
    }

    #[test]
    fn test_prepare_detects_a_different_document() {
        let table = resolve_str(r#"[{"a": 1}]"#);
        let mut reader = TableReader::resolve(cursor(r#"{"a": 1}  "#), table, 8).unwrap();
        assert!(matches!(
            reader.prepare(),
            Err(JsonTableError::SourceUnavailable { .. })
        ));
    }

    //==============================================================================
    // IV. Options, Caching and Arrow Integration
    //==============================================================================

    #[test]
    fn test_projection_selects_and_orders_columns() {
        let json = r#"{"a": [1, 2], "b": ["x", "y"], "c": [true, false]}"#;
        let options = ReaderOptions::default().with_projection(["c", "a"]);
        let mut reader =
            TableReader::resolve_with_options(cursor(json), resolve_str(json), &options).unwrap();
        reader.prepare().unwrap();

        let batch = reader.next_batch().unwrap().unwrap();

        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.schema().field(0).name(), "c");
        assert_eq!(int_values(&batch, 1), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_invalid_projection() {
        let json = r#"[{"a": 1}]"#;
        for projection in [vec![], vec!["zzz"], vec!["a", "a"]] {
            let options = ReaderOptions::default().with_projection(projection);
            assert!(matches!(
                TableReader::resolve_with_options(cursor(json), resolve_str(json), &options),
                Err(JsonTableError::InvalidDescriptor(_))
            ));
        }
    }

    #[test]
    fn test_cached_table_type_drives_a_reader() {
        let json = r#"{"a":[1,2,3],"b":["x","y","z"]}"#;
        let cached = resolve_str(json).to_json().unwrap();

        let table = TableType::from_json(&cached).unwrap();
        let mut reader = TableReader::resolve(cursor(json), table, 10).unwrap();
        reader.prepare().unwrap();

        assert_eq!(drain(&mut reader)[0].num_rows(), 3);
    }

    #[test]
    fn test_iterator_auto_prepares() {
        let json = r#"[{"x": 1.5}, {"x": 2}, {"x": null}]"#;
        let reader = TableReader::resolve(cursor(json), resolve_str(json), 2).unwrap();

        let batches: Vec<RecordBatch> = reader.collect::<Result<_, _>>().unwrap();

        assert_eq!(batches.len(), 2);
        let x = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(x.value(1), 2.0);
        assert!(batches[1].column(0).is_null(0));
    }

    #[test]
    fn test_iterator_stops_after_reporting_an_error() {
        let json = r#"[{"a": 1}, {"a": "x"}]"#;
        let options = ResolveOptions::default().with_type_hint("a", DataType::Int64);
        let table = resolve_table_type(&mut cursor(json), &options).unwrap();
        let mut reader = TableReader::resolve(cursor(json), table, 1).unwrap();

        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_open_table_and_read_all() {
        let json = r#"[{"a": 1}, {"a": 2}, {"a": 3}]"#;
        let reader = open_table(
            cursor(json),
            &ResolveOptions::default(),
            &ReaderOptions::default().with_batch_size(2),
        )
        .unwrap();
        assert_eq!(reader.state(), ReaderState::Prepared);

        let batches = read_all(
            cursor(json),
            &ResolveOptions::default(),
            &ReaderOptions::default().with_batch_size(2),
        )
        .unwrap();
        assert_eq!(batches.len(), 2);
    }

    //==============================================================================
    // V. Randomized Tables
    //==============================================================================

    struct RandomTable {
        ids: Vec<i64>,
        scores: Vec<Option<f64>>,
        names: Vec<Option<String>>,
    }

    fn random_table(seed: u64, rows: usize) -> RandomTable {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut table = RandomTable {
            ids: Vec::new(),
            scores: Vec::new(),
            names: Vec::new(),
        };
        for i in 0..rows {
            table.ids.push(rng.random_range(-1_000_000..1_000_000));
            let score = rng.random_range(-100.0..100.0);
            table
                .scores
                .push((i == 0 || rng.random_bool(0.8)).then_some(score));
            let name = format!("n{}", rng.random_range(0..50));
            table.names.push((i == 0 || rng.random_bool(0.7)).then_some(name));
        }
        table
    }

    fn as_rows_json(table: &RandomTable) -> String {
        let rows: Vec<Value> = (0..table.ids.len())
            .map(|i| {
                let mut row = serde_json::Map::new();
                row.insert("id".into(), json!(table.ids[i]));
                row.insert("score".into(), json!(table.scores[i]));
                if let Some(name) = &table.names[i] {
                    row.insert("name".into(), json!(name));
                }
                Value::Object(row)
            })
            .collect();
        serde_json::to_string(&rows).unwrap()
    }

    fn as_columns_json(table: &RandomTable) -> String {
        serde_json::to_string_pretty(&json!({
            "id": table.ids,
            "score": table.scores,
            "name": table.names,
        }))
        .unwrap()
    }

    fn assert_matches_table(json: &str, expected: &RandomTable, batch_size: usize) {
        let mut reader = prepared_reader(json, batch_size);
        let batches = drain(&mut reader);
        assert!(batches.iter().all(|b| b.num_rows() <= batch_size));

        let all = concat_batches(&reader.schema(), &batches).unwrap();
        let schema = all.schema();
        let column = |name: &str| schema.index_of(name).unwrap();

        let ids = int_values(&all, column("id"));
        assert_eq!(ids, expected.ids.iter().copied().map(Some).collect::<Vec<_>>());

        let scores: Vec<Option<f64>> = all
            .column(column("score"))
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
            .iter()
            .collect();
        assert_eq!(scores, expected.scores);

        assert_eq!(str_values(&all, column("name")), expected.names);
    }

    #[test]
    fn test_random_tables_round_trip_through_both_shapes() {
        for seed in 0..4u64 {
            let mut rng = StdRng::seed_from_u64(seed + 100);
            let rows = rng.random_range(1..300);
            let batch_size = rng.random_range(1..64);
            let table = random_table(seed, rows);

            let rows_json = as_rows_json(&table);
            assert_eq!(resolve_str(&rows_json).shape(), TableShape::RowsArray);
            assert_matches_table(&rows_json, &table, batch_size);

            let columns_json = as_columns_json(&table);
            let resolved = resolve_str(&columns_json);
            assert_eq!(resolved.shape(), TableShape::ColumnsObject);
            assert!(resolved.column_boundaries().is_disjoint());
            assert_matches_table(&columns_json, &table, batch_size);
        }
    }

    #[test]
    fn test_boxed_sources_are_accepted() {
        let json = r#"[{"a": 1}]"#;
        let boxed: crate::source::BoxedSource = Box::new(cursor(json));
        let mut reader = TableReader::resolve(boxed, resolve_str(json), 1).unwrap();
        reader.prepare().unwrap();
        assert_eq!(drain(&mut reader).len(), 1);
    }

    //==============================================================================
    // Batch Sizing And I/O Volume
    //==============================================================================

    #[test]
    fn test_huge_batch_size_reads_all_rows() {
        // Arrange
        let json = r#"[{"a": 1}, {"a": 2}]"#;
        let batch_size = 1usize << 62;
        let mut reader = TableReader::resolve(cursor(json), resolve_str(json), batch_size).unwrap();
        reader.prepare().unwrap();

        // Act
        let batches = drain(&mut reader);

        // Assert
        assert_eq!(batches.len(), 1);
        assert_eq!(int_values(&batches[0], 0), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_columns_reader_reads_each_span_about_once() {
        // Arrange: 8 columns, each far larger than one read buffer.
        let rows = 20_000usize;
        let columns: Vec<String> = (0..8)
            .map(|c| {
                let values: Vec<String> = (0..rows).map(|i| (i * 7 + c).to_string()).collect();
                format!(r#""c{}":[{}]"#, c, values.join(","))
            })
            .collect();
        let json = format!("{{{}}}", columns.join(","));
        let table = resolve_str(&json);
        let (source, bytes_read) = CountingSource::new(&json);
        let mut reader = TableReader::resolve(source, table, 1024).unwrap();
        reader.prepare().unwrap();

        // Act
        let batches = drain(&mut reader);

        // Assert
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), rows);
        assert_eq!(int_values(&batches[0], 3)[..2], [Some(3), Some(10)]);
        let read = bytes_read.load(Ordering::Relaxed);
        assert!(
            read <= 2 * json.len() as u64,
            "read {} bytes for a {}-byte document",
            read,
            json.len()
        );
    }

    #[test]
    fn test_projected_columns_read_only_their_spans() {
        let json = r#"{"small": [1, 2], "big": ["xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx", "y"]}"#;
        let table = resolve_str(json);
        let (source, bytes_read) = CountingSource::new(json);
        let options = ReaderOptions::default().with_projection(vec!["small".to_string()]);
        let mut reader = TableReader::resolve_with_options(source, table, &options).unwrap();
        reader.prepare().unwrap();

        let batches = drain(&mut reader);

        assert_eq!(int_values(&batches[0], 0), vec![Some(1), Some(2)]);
        assert_eq!(bytes_read.load(Ordering::Relaxed), "[1, 2]".len() as u64);
    }

    //==============================================================================
    // Values Outside serde_json Defaults
    //==============================================================================

    #[test]
    fn test_deeply_nested_values_are_read_as_json_text() {
        // Arrange
        let depth = 200;
        let nested = format!("{}0{}", "[".repeat(depth), "]".repeat(depth));
        let json = format!(r#"[{{"a": {}}}, {{"a": 1}}]"#, nested);

        // Act
        let batches = drain(&mut prepared_reader(&json, 8));

        // Assert
        assert_eq!(str_values(&batches[0], 0), vec![Some(nested), Some("1".to_string())]);
    }

    #[test]
    fn test_numbers_beyond_float_range_become_json_text() {
        let json = r#"[{"a": 1e400}, {"a": 2.5}]"#;
        let table = resolve_str(json);
        let field = table.schema().field(0).clone();
        assert_eq!(field.data_type(), &DataType::Utf8);
        assert!(crate::types::is_json_encoded_field(&field));

        let batches = drain(&mut prepared_reader(json, 8));
        assert_eq!(
            str_values(&batches[0], 0),
            vec![Some("1e400".to_string()), Some("2.5".to_string())]
        );
    }
}
