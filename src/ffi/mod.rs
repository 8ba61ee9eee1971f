// In: src/ffi/mod.rs

//! The C ABI surface of the library.
//!
//! Foreign runtimes open a table through `jsontable_open_path` or
//! `jsontable_open_buffer`, receive an opaque handle, and drive it through the
//! `JsonTableStream` function table. A handle can also be handed off as a
//! standard Arrow C stream with `jsontable_export_arrow_stream`.

pub mod stream;

pub use stream::{
    open_stream_count, register_stream, stream_descriptor, JsonTableStream, StreamHandle,
    JSONTABLE_STREAM_VERSION, STREAM_END, STREAM_ERROR, STREAM_INVALID_HANDLE, STREAM_OK,
};
