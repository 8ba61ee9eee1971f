//! This module defines the type representations used while inferring a
//! table schema from JSON values.
//!
//! It includes the `InferredType` promotion lattice and the field metadata
//! convention that marks JSON-encoded `Utf8` columns.

pub mod inferred_type;

// Re-export the main type(s) for easier access.
pub use inferred_type::{
    is_json_encoded_field, is_supported_arrow_type, InferredType, ENCODING_METADATA_KEY,
    JSON_ENCODING,
};
