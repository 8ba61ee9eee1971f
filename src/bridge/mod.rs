// In: src/bridge/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Bridge Layer
// ====================================================================================
//
// The `bridge` is the public-facing API of the jsontable library. It hides the
// byte-level scanner, the resolver internals and the shape-specific decoders
// behind a single reader contract.
//
// Data Flow:
//
//   1. [Resolver (resolve_table_type)]      -> Receives an `InputSource`
//         |
//         `-> one sequential pass: shape + unified schema + column byte ranges
//         |
//         `-> Returns an immutable `TableType`
//
//   2. [Table Descriptor (TableDescriptor)] -> Validates `TableType` + batch size
//
//   3. [Stateful Facade (TableReader)]      -> Dispatches on shape exactly once
//         |
//         `-> a. `prepare` positions the source at the data region
//         |
//         `-> b. `next_batch` pulls up to `batch_size` rows from the decoder
//         |
//         `-> c. `rewind` returns to the first row without re-resolving
//
//   4. [Stream Adapters (crate::ffi)]       -> Forward calls across the C ABI
//
// ====================================================================================
pub mod format;
pub mod reader;
pub mod stateless_api;

// --- High-Level Stateful API ---
pub use reader::{ReaderState, TableReader};

// --- Stateless API ---
pub use crate::resolver::resolve_table_type;
pub use stateless_api::{analyze_table, open_table, read_all, read_column};

// --- Format Structs ---
pub use format::{ColumnBoundaries, FileRange, TableDescriptor, TableShape, TableStats, TableType};

#[cfg(test)]
mod tests;
