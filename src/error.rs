// In: src/error.rs

//! This module defines the single, unified error type for the entire jsontable library.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.
//!
//! Every variant that can be produced while scanning a document carries enough
//! context (shape, byte offset, column, row) for the caller to diagnose it.

use arrow::error::ArrowError;
use thiserror::Error;

use crate::bridge::format::TableShape;

/// Convenience alias used throughout the crate.
pub type Result<T, E = JsonTableError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum JsonTableError {
    // =========================================================================
    // === Resolution Errors (raised while classifying a document)
    // =========================================================================
    /// The input is not syntactically valid JSON.
    #[error("Malformed JSON input at byte {offset}: {message}")]
    MalformedInput { offset: u64, message: String },

    /// The input is valid JSON but matches none of the table shapes.
    #[error("Unrecognized table shape at byte {offset}: {reason}")]
    UnrecognizedShape { offset: u64, reason: String },

    /// A reader was requested for a shape that has no reader implementation.
    #[error("Unsupported table shape: {0}")]
    UnsupportedShape(TableShape),

    /// A descriptor or option set failed validation.
    #[error("Invalid table descriptor: {0}")]
    InvalidDescriptor(String),

    // =========================================================================
    // === Reader Errors (raised by Prepare / pull / Rewind)
    // =========================================================================
    #[error(
        "Schema violation in column '{column}' at row {row} (byte {offset}): expected {expected}, found {found}"
    )]
    SchemaViolation {
        column: String,
        row: u64,
        offset: u64,
        expected: String,
        found: String,
    },

    #[error("Input source unavailable for {shape} reader: {message}")]
    SourceUnavailable { shape: TableShape, message: String },

    #[error("Input source of {shape} reader cannot be rewound: {message}")]
    NotRewindable { shape: TableShape, message: String },

    /// A reader operation was invoked out of order (e.g. pull before Prepare).
    #[error("Invalid reader state: {0}")]
    InvalidState(String),

    // =========================================================================
    // === Boundary & Internal Errors
    // =========================================================================
    #[error("FFI operation failed: {0}")]
    FfiError(String),

    #[error("Internal logic error (this is a bug): {0}")]
    InternalError(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the Arrow library.
    #[error("Arrow operation failed: {0}")]
    Arrow(#[from] ArrowError),

    /// An error originating from the underlying input source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library, typically while loading options.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl JsonTableError {
    /// Shorthand for a `MalformedInput` error at `offset`.
    pub(crate) fn malformed(offset: u64, message: impl Into<String>) -> Self {
        JsonTableError::MalformedInput {
            offset,
            message: message.into(),
        }
    }

    /// Shorthand for an `UnrecognizedShape` error at `offset`.
    pub(crate) fn unrecognized(offset: u64, reason: impl Into<String>) -> Self {
        JsonTableError::UnrecognizedShape {
            offset,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// === Manual `From` Implementations ===
// =============================================================================

impl From<JsonTableError> for ArrowError {
    fn from(err: JsonTableError) -> ArrowError {
        match err {
            JsonTableError::Arrow(inner) => inner,
            other => ArrowError::ExternalError(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_violation_display_carries_context() {
        let err = JsonTableError::SchemaViolation {
            column: "a".into(),
            row: 7,
            offset: 120,
            expected: "Int64".into(),
            found: "string".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'a'"));
        assert!(msg.contains("row 7"));
        assert!(msg.contains("byte 120"));
        assert!(msg.contains("Int64"));
    }

    #[test]
    fn test_arrow_error_passthrough() {
        let err = JsonTableError::Arrow(ArrowError::SchemaError("bad".into()));
        let arrow: ArrowError = err.into();
        assert!(matches!(arrow, ArrowError::SchemaError(_)));
    }

    #[test]
    fn test_other_errors_wrap_as_external() {
        let err = JsonTableError::UnsupportedShape(TableShape::Unrecognized);
        let arrow: ArrowError = err.into();
        assert!(matches!(arrow, ArrowError::ExternalError(_)));
        assert!(arrow.to_string().contains("UNRECOGNIZED"));
    }
}
