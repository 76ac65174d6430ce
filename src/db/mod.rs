//! Database module: the SQLite destination store.
//!
//! Layout:
//! - `models.rs`: parsed tables and cell values
//! - `schema.rs`: SQL text and identifier quoting
//! - `sqlite.rs`: read-write store for ingestion, read-only handle for queries

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::{CellValue, ColumnDef, ColumnType, ParsedTable};
pub use sqlite::{QueryHandle, QueryRows, SqlitePool, TableStore};
