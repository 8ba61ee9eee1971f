// In: src/ffi/stream.rs

//! The cross-boundary stream adapter.
//!
//! A foreign runtime drives a `TableReader` through a fixed, versioned table
//! of `extern "C"` function pointers (`JsonTableStream`) and an opaque integer
//! handle. Batches and schemas cross the boundary through the Arrow C data
//! interface. The adapter holds nothing but the registered readers; every
//! handle must be released exactly once.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{c_char, CStr, CString};
use std::fs::File;
use std::io::Cursor;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arrow::array::{ArrayData, StructArray};
use arrow::ffi::{FFI_ArrowArray, FFI_ArrowSchema};
use arrow::ffi_stream::FFI_ArrowArrayStream;

use crate::bridge::reader::{ReaderState, TableReader};
use crate::bridge::stateless_api::open_table;
use crate::config::{ReaderOptions, ResolveOptions, DEFAULT_BATCH_SIZE};
use crate::error::{JsonTableError, Result};
use crate::observability::enable_verbose_logging;
use crate::source::InputSource;

/// Layout version of `JsonTableStream`.
pub const JSONTABLE_STREAM_VERSION: u32 = 1;

/// An opaque reader handle. `0` is never a valid handle.
pub type StreamHandle = usize;

pub const STREAM_OK: i32 = 0;
/// `get_next` has no more batches.
pub const STREAM_END: i32 = 1;
/// The call failed; `get_last_error` describes why.
pub const STREAM_ERROR: i32 = -1;
/// The handle is unknown or was already released.
pub const STREAM_INVALID_HANDLE: i32 = -2;

//==================================================================================
// I. The Descriptor
//==================================================================================

/// The function table handed to foreign callers.
///
/// - `get_schema` writes the reader's schema into a caller-owned `FFI_ArrowSchema`.
/// - `get_next` writes the next batch, as a struct array, into a caller-owned
///   `FFI_ArrowArray`; returns `STREAM_END` after the last batch. The reader is
///   prepared on the first call.
/// - `get_last_error` returns the message of the last failed call on the
///   handle, or null. The pointer stays valid until the next call on the
///   same handle.
/// - `release` drops the reader and its input source.
#[repr(C)]
pub struct JsonTableStream {
    pub version: u32,
    pub get_schema: unsafe extern "C" fn(StreamHandle, *mut FFI_ArrowSchema) -> i32,
    pub get_next: unsafe extern "C" fn(StreamHandle, *mut FFI_ArrowArray) -> i32,
    pub get_last_error: unsafe extern "C" fn(StreamHandle) -> *const c_char,
    pub release: unsafe extern "C" fn(StreamHandle) -> i32,
}

static DESCRIPTOR: JsonTableStream = JsonTableStream {
    version: JSONTABLE_STREAM_VERSION,
    get_schema: stream_get_schema,
    get_next: stream_get_next,
    get_last_error: stream_get_last_error,
    release: stream_release,
};

/// Returns the process-wide stream function table.
pub fn stream_descriptor() -> &'static JsonTableStream {
    &DESCRIPTOR
}

//==================================================================================
// II. Handle Registry
//==================================================================================

struct StreamEntry {
    reader: TableReader,
    last_error: Option<CString>,
}

impl StreamEntry {
    fn record(&mut self, result: Result<i32>) -> i32 {
        match result {
            Ok(code) => {
                self.last_error = None;
                code
            }
            Err(e) => {
                log::warn!("Stream call failed: {}", e);
                self.last_error = Some(to_c_string(&e.to_string()));
                STREAM_ERROR
            }
        }
    }
}

type SharedEntry = Arc<Mutex<StreamEntry>>;

static STREAMS: Mutex<BTreeMap<StreamHandle, SharedEntry>> = Mutex::new(BTreeMap::new());
static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_c_string(message: &str) -> CString {
    CString::new(message.replace('\0', " ")).unwrap_or_default()
}

fn lookup(handle: StreamHandle) -> Option<SharedEntry> {
    lock(&STREAMS).get(&handle).cloned()
}

/// Registers `reader` and returns the handle foreign callers use to drive it.
pub fn register_stream(reader: TableReader) -> StreamHandle {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    log::debug!("Registered {} reader as stream {}", reader.shape(), handle);
    lock(&STREAMS).insert(
        handle,
        Arc::new(Mutex::new(StreamEntry {
            reader,
            last_error: None,
        })),
    );
    handle
}

/// Number of handles not yet released.
pub fn open_stream_count() -> usize {
    lock(&STREAMS).len()
}

//==================================================================================
// III. Descriptor Entry Points
//==================================================================================

unsafe extern "C" fn stream_get_schema(handle: StreamHandle, out: *mut FFI_ArrowSchema) -> i32 {
    let Some(entry) = lookup(handle) else {
        return STREAM_INVALID_HANDLE;
    };
    let mut entry = lock(&entry);
    let result = if out.is_null() {
        Err(JsonTableError::FfiError("get_schema received a null output pointer".into()))
    } else {
        FFI_ArrowSchema::try_from(entry.reader.schema().as_ref())
            .map(|schema| {
                // SAFETY: `out` is non-null and points to caller-owned storage.
                unsafe { ptr::write(out, schema) };
                STREAM_OK
            })
            .map_err(JsonTableError::from)
    };
    entry.record(result)
}

unsafe extern "C" fn stream_get_next(handle: StreamHandle, out: *mut FFI_ArrowArray) -> i32 {
    let Some(entry) = lookup(handle) else {
        return STREAM_INVALID_HANDLE;
    };
    let mut entry = lock(&entry);
    let result = if out.is_null() {
        Err(JsonTableError::FfiError("get_next received a null output pointer".into()))
    } else {
        // SAFETY: `out` is non-null and points to caller-owned storage.
        unsafe { pull_into(&mut entry.reader, out) }
    };
    entry.record(result)
}

/// # Safety
/// `out` must be non-null and valid for a write of one `FFI_ArrowArray`.
unsafe fn pull_into(reader: &mut TableReader, out: *mut FFI_ArrowArray) -> Result<i32> {
    if reader.state() == ReaderState::Created {
        reader.prepare()?;
    }
    match reader.next_batch()? {
        Some(batch) => {
            let data: ArrayData = StructArray::from(batch).into();
            unsafe { ptr::write(out, FFI_ArrowArray::new(&data)) };
            Ok(STREAM_OK)
        }
        None => Ok(STREAM_END),
    }
}

unsafe extern "C" fn stream_get_last_error(handle: StreamHandle) -> *const c_char {
    let Some(entry) = lookup(handle) else {
        return ptr::null();
    };
    let entry = lock(&entry);
    entry
        .last_error
        .as_ref()
        .map_or(ptr::null(), |message| message.as_ptr())
}

unsafe extern "C" fn stream_release(handle: StreamHandle) -> i32 {
    match lock(&STREAMS).remove(&handle) {
        Some(_) => {
            log::debug!("Released stream {}", handle);
            STREAM_OK
        }
        None => {
            log::warn!("Ignoring release of unknown or already released stream {}", handle);
            STREAM_INVALID_HANDLE
        }
    }
}

//==================================================================================
// IV. Exported C Functions
//==================================================================================

thread_local! {
    static LAST_OPEN_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn open_and_register<S: InputSource + 'static>(source: S, batch_size: usize) -> StreamHandle {
    let batch_size = if batch_size == 0 {
        DEFAULT_BATCH_SIZE
    } else {
        batch_size
    };
    let options = ReaderOptions::default().with_batch_size(batch_size);
    match open_table(source, &ResolveOptions::default(), &options) {
        Ok(reader) => {
            LAST_OPEN_ERROR.with(|slot| slot.borrow_mut().take());
            register_stream(reader)
        }
        Err(e) => {
            set_open_error(&e.to_string());
            0
        }
    }
}

fn set_open_error(message: &str) {
    log::warn!("Failed to open JSON table: {}", message);
    LAST_OPEN_ERROR.with(|slot| *slot.borrow_mut() = Some(to_c_string(message)));
}

/// Resolves the JSON file at `path` and registers a prepared reader over it.
/// A `batch_size` of 0 selects the default. Returns 0 on failure.
///
/// # Safety
/// `path` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn jsontable_open_path(path: *const c_char, batch_size: usize) -> StreamHandle {
    if path.is_null() {
        set_open_error("path is null");
        return 0;
    }
    // SAFETY: checked for null above; the caller guarantees NUL termination.
    let path = match unsafe { CStr::from_ptr(path) }.to_str() {
        Ok(path) => path,
        Err(e) => {
            set_open_error(&format!("path is not valid UTF-8: {}", e));
            return 0;
        }
    };
    match File::open(path) {
        Ok(file) => open_and_register(file, batch_size),
        Err(e) => {
            set_open_error(&format!("cannot open '{}': {}", path, e));
            0
        }
    }
}

/// Copies `len` bytes of JSON from `data` and registers a prepared reader
/// over the copy. Returns 0 on failure.
///
/// # Safety
/// `data` must be valid for reads of `len` bytes, or null when `len` is 0.
#[no_mangle]
pub unsafe extern "C" fn jsontable_open_buffer(
    data: *const u8,
    len: usize,
    batch_size: usize,
) -> StreamHandle {
    let bytes = if len == 0 {
        Vec::new()
    } else if data.is_null() {
        set_open_error("buffer is null");
        return 0;
    } else {
        // SAFETY: the caller guarantees `data` is valid for `len` bytes.
        unsafe { std::slice::from_raw_parts(data, len) }.to_vec()
    };
    open_and_register(Cursor::new(bytes), batch_size)
}

/// Message of the last failed open on this thread, or null.
#[no_mangle]
pub extern "C" fn jsontable_last_open_error() -> *const c_char {
    LAST_OPEN_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}

#[no_mangle]
pub extern "C" fn jsontable_stream_descriptor() -> *const JsonTableStream {
    &DESCRIPTOR
}

/// Consumes `handle` and exports its reader as a standard Arrow C stream.
/// On success the handle is released; on failure it stays valid.
///
/// # Safety
/// `out` must point to writable storage for one `FFI_ArrowArrayStream`.
#[no_mangle]
pub unsafe extern "C" fn jsontable_export_arrow_stream(
    handle: StreamHandle,
    out: *mut FFI_ArrowArrayStream,
) -> i32 {
    if out.is_null() {
        return STREAM_ERROR;
    }
    let mut streams = lock(&STREAMS);
    let Some(entry) = streams.remove(&handle) else {
        return STREAM_INVALID_HANDLE;
    };
    match Arc::try_unwrap(entry) {
        Ok(entry) => {
            let entry = entry.into_inner().unwrap_or_else(PoisonError::into_inner);
            // SAFETY: `out` is non-null and points to caller-owned storage.
            unsafe { ptr::write(out, entry.reader.into_ffi_stream()) };
            log::debug!("Exported stream {} as an Arrow C stream", handle);
            STREAM_OK
        }
        Err(shared) => {
            // Another call on this handle is still running.
            lock(&shared).last_error = Some(to_c_string("stream is in use by another call"));
            streams.insert(handle, shared);
            STREAM_ERROR
        }
    }
}

/// Turns on debug logging, appending to `log_file` when it is not null.
///
/// # Safety
/// `log_file` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn jsontable_enable_verbose_logging(log_file: *const c_char) -> i32 {
    let log_file = if log_file.is_null() {
        None
    } else {
        // SAFETY: checked for null above; the caller guarantees NUL termination.
        Some(unsafe { CStr::from_ptr(log_file) }.to_string_lossy().into_owned())
    };
    match enable_verbose_logging(log_file) {
        Ok(()) => STREAM_OK,
        Err(_) => STREAM_ERROR,
    }
}
