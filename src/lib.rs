//! This file is the root of the `jsontable` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of the library (`bridge`, `resolver`,
//!     `shapes`, etc.) so the Rust compiler knows they exist.
//! 2.  Re-exporting the public API: shape resolution, the `TableReader`
//!     facade, and the C stream adapter in `ffi`.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
//==================================================================================
// 1. Module Declarations
//==================================================================================
#[macro_use]
mod observability; // Make macros available throughout the crate

pub mod bridge;
pub mod config;
pub mod error;
pub mod ffi;
pub mod source;
pub mod types;

mod json;
mod resolver;
mod shapes;

//==================================================================================
// 2. Public API
//==================================================================================
pub use bridge::{
    analyze_table, open_table, read_all, read_column, resolve_table_type, ColumnBoundaries,
    FileRange, ReaderState, TableDescriptor, TableReader, TableShape, TableStats, TableType,
};
pub use config::{ReaderOptions, ResolveOptions};
pub use error::{JsonTableError, Result};
pub use observability::enable_verbose_logging;
pub use source::{BoxedSource, ForwardOnlySource, InputSource};
