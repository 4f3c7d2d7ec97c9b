//! Database-agnostic types and traits used throughout the engine.
//!
//! - [`schema`]: table, column and database identity
//! - [`value`]: SQL values, rows and batches
//! - [`chunk`]: per-table chunk sizing
//! - [`traits`]: catalog, reader and writer seams
//! - [`identifier`]: identifier quoting

pub mod chunk;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use chunk::{chunk_rows, ChunkPlan, Chunker};
pub use schema::{Column, DatabaseHandle, Dialect, TableDescriptor};
pub use traits::{BatchStream, Catalog, ReadOptions, SourceReader, TargetWriter};
pub use value::{Batch, Row, SqlNullType, SqlValue, WriteMode};
