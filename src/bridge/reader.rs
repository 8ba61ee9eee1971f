// In: src/bridge/reader.rs

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::ffi_stream::FFI_ArrowArrayStream;
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use hashbrown::HashSet;

use crate::bridge::format::{TableDescriptor, TableShape, TableType};
use crate::config::ReaderOptions;
use crate::error::{JsonTableError, Result};
use crate::shapes::{create_decoder, BatchBuilder, ShapeDecoder};
use crate::source::{BoxedSource, InputSource};

//==================================================================================
// I. Reader State
//==================================================================================

/// Lifecycle of a `TableReader`.
///
/// `Created -> Prepared -> Reading -> Exhausted`. `rewind` returns to
/// `Prepared` from any state except `Created`. A failed pull moves to
/// `Failed`, from which only `rewind` recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Created,
    Prepared,
    Reading,
    Exhausted,
    Failed,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

//==================================================================================
// II. The Table Reader (The Façade)
//==================================================================================

/// A shape-agnostic, restartable reader that materializes a resolved JSON
/// table as a sequence of `RecordBatch`es of at most `batch_size` rows.
///
/// The reader exclusively owns its input source; dropping the reader
/// releases it.
pub struct TableReader {
    descriptor: TableDescriptor,
    /// The schema of emitted batches (the table schema, projected).
    schema: SchemaRef,
    decoder: Box<dyn ShapeDecoder>,
    builder: BatchBuilder,
    state: ReaderState,
    rows_read: u64,
}

impl TableReader {
    /// Builds a reader for `table_type` over `source`, emitting batches of at
    /// most `batch_size` rows. The shape is dispatched on once, here.
    pub fn resolve<S: InputSource + 'static>(
        source: S,
        table_type: impl Into<Arc<TableType>>,
        batch_size: usize,
    ) -> Result<Self> {
        let options = ReaderOptions::default().with_batch_size(batch_size);
        Self::resolve_with_options(source, table_type, &options)
    }

    /// Like `resolve`, with a projection and read buffer size.
    pub fn resolve_with_options<S: InputSource + 'static>(
        source: S,
        table_type: impl Into<Arc<TableType>>,
        options: &ReaderOptions,
    ) -> Result<Self> {
        let descriptor = TableDescriptor::new(table_type, options.batch_size)?;
        Self::from_descriptor(Box::new(source), descriptor, options)
    }

    pub fn from_descriptor(
        source: BoxedSource,
        descriptor: TableDescriptor,
        options: &ReaderOptions,
    ) -> Result<Self> {
        let table_schema = descriptor.table_type().schema();
        let columns = projected_columns(&descriptor, options.projection.as_deref())?;
        let indices = columns
            .iter()
            .map(|name| table_schema.index_of(name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let schema: SchemaRef = Arc::new(table_schema.project(&indices)?);

        let decoder = create_decoder(
            descriptor.table_type(),
            source,
            &columns,
            options.read_buffer_size,
        )?;
        let expected_rows =
            usize::try_from(descriptor.table_type().num_rows()).unwrap_or(usize::MAX);
        let builder =
            BatchBuilder::try_new(schema.clone(), descriptor.batch_size().min(expected_rows))?;

        log::info!(
            "Created {} reader: {} of {} columns, batch size {}",
            descriptor.shape(),
            schema.fields().len(),
            table_schema.fields().len(),
            descriptor.batch_size()
        );
        Ok(Self {
            descriptor,
            schema,
            decoder,
            builder,
            state: ReaderState::Created,
            rows_read: 0,
        })
    }

    /// Positions the source at the start of the data region. Must be called
    /// exactly once before the first pull. On failure the reader stays in
    /// `Created` and `prepare` may be retried.
    pub fn prepare(&mut self) -> Result<()> {
        if self.state != ReaderState::Created {
            return Err(JsonTableError::InvalidState(format!(
                "prepare called on a reader in state {}; use rewind to restart",
                self.state
            )));
        }
        self.decoder.prepare()?;
        self.state = ReaderState::Prepared;
        log::debug!("Prepared {} reader", self.shape());
        Ok(())
    }

    /// Pulls the next batch. Returns `Ok(None)` once all rows have been read.
    ///
    /// An error fails only the current pull; batches already returned stay
    /// valid. After an error the reader must be rewound before pulling again.
    pub fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        match self.state {
            ReaderState::Created => {
                return Err(JsonTableError::InvalidState(
                    "next_batch called before prepare".into(),
                ))
            }
            ReaderState::Failed => {
                return Err(JsonTableError::InvalidState(
                    "an earlier pull failed; rewind before reading again".into(),
                ))
            }
            ReaderState::Exhausted => return Ok(None),
            ReaderState::Prepared | ReaderState::Reading => {}
        }

        let pulled = self
            .decoder
            .next_rows(&mut self.builder, self.descriptor.batch_size())
            .and_then(|rows| match rows {
                0 => Ok(None),
                _ => self.builder.finish().map(|batch| Some((rows, batch))),
            });

        match pulled {
            Ok(Some((rows, batch))) => {
                self.rows_read += rows as u64;
                self.state = ReaderState::Reading;
                log_metric!(
                    "event" = "batch_pulled",
                    "shape" = &self.shape(),
                    "rows" = &rows,
                    "rows_read" = &self.rows_read
                );
                Ok(Some(batch))
            }
            Ok(None) => {
                self.builder.reset();
                self.state = ReaderState::Exhausted;
                log::debug!(
                    "{} reader exhausted after {} rows",
                    self.shape(),
                    self.rows_read
                );
                Ok(None)
            }
            Err(e) => {
                self.builder.reset();
                self.state = ReaderState::Failed;
                log::warn!("{} reader failed after {} rows: {}", self.shape(), self.rows_read, e);
                Err(e)
            }
        }
    }

    /// Moves back to the first row without re-resolving the document.
    ///
    /// Fails with `NotRewindable` if the source cannot seek backward; the
    /// reader state is unchanged by a failed rewind.
    pub fn rewind(&mut self) -> Result<()> {
        if self.state == ReaderState::Created {
            return Err(JsonTableError::InvalidState(
                "rewind called before prepare".into(),
            ));
        }
        if !self.decoder.can_rewind() {
            return Err(JsonTableError::NotRewindable {
                shape: self.shape(),
                message: "the input source only supports forward reads".into(),
            });
        }
        self.decoder.rewind()?;
        self.builder.reset();
        self.rows_read = 0;
        self.state = ReaderState::Prepared;
        log::debug!("Rewound {} reader", self.shape());
        Ok(())
    }

    /// The schema of the batches this reader emits.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn table_type(&self) -> &Arc<TableType> {
        self.descriptor.table_type()
    }

    pub fn shape(&self) -> TableShape {
        self.descriptor.shape()
    }

    pub fn batch_size(&self) -> usize {
        self.descriptor.batch_size()
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Rows returned since the last `prepare` or `rewind`.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Exports the reader as an Arrow C stream. The stream prepares the
    /// reader on its first pull if needed.
    pub fn into_ffi_stream(self) -> FFI_ArrowArrayStream {
        FFI_ArrowArrayStream::new(Box::new(self))
    }
}

impl fmt::Debug for TableReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableReader")
            .field("shape", &self.shape())
            .field("batch_size", &self.batch_size())
            .field("columns", &self.schema.fields().len())
            .field("state", &self.state)
            .field("rows_read", &self.rows_read)
            .finish()
    }
}

/// Resolves the projection against the table schema. `None` selects every column.
fn projected_columns(
    descriptor: &TableDescriptor,
    projection: Option<&[String]>,
) -> Result<Vec<String>> {
    let schema = descriptor.table_type().schema();
    let Some(projection) = projection else {
        return Ok(schema.fields().iter().map(|f| f.name().clone()).collect());
    };
    if projection.is_empty() {
        return Err(JsonTableError::InvalidDescriptor(
            "projection selects no columns".into(),
        ));
    }
    let mut seen = HashSet::new();
    for name in projection {
        if schema.field_with_name(name).is_err() {
            return Err(JsonTableError::InvalidDescriptor(format!(
                "projected column '{}' is not in the table schema",
                name
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(JsonTableError::InvalidDescriptor(format!(
                "column '{}' is projected twice",
                name
            )));
        }
    }
    Ok(projection.to_vec())
}

//==================================================================================
// III. Arrow Reader Integration
//==================================================================================

impl Iterator for TableReader {
    type Item = std::result::Result<RecordBatch, ArrowError>;

    /// Prepares on first use. After an error has been yielded once, iteration ends.
    fn next(&mut self) -> Option<Self::Item> {
        if self.state == ReaderState::Created {
            if let Err(e) = self.prepare() {
                self.state = ReaderState::Failed;
                return Some(Err(e.into()));
            }
        }
        if self.state == ReaderState::Failed {
            return None;
        }
        self.next_batch().map_err(ArrowError::from).transpose()
    }
}

impl RecordBatchReader for TableReader {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}
