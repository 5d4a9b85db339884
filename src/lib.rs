//! Catalog toolkit for SQLite object databases: a primary `Sources`-style
//! table with per-object child tables, shared reference tables, and a
//! directory of JSON documents that round-trips the whole store.

pub mod classify;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod export;
pub mod ingest;
pub mod inventory;
pub mod loader;
pub mod names;
pub mod output;
pub mod schema;
pub mod search;
pub mod value;

#[cfg(test)]
mod fixtures;

pub use classify::{TableClassifier, TableKind};
pub use config::{CatalogConfig, Config, SearchColumn};
pub use database::{copy_database_schema, create_database, open_connection, Database, TableHandle};
pub use document::Document;
pub use error::{DbError, Result};
pub use export::{CollisionPolicy, ExportOptions, ExportSummary};
pub use ingest::{DataFormat, TableData};
pub use loader::{LoadOptions, LoadSummary};
pub use names::{NameResolver, StaticResolver};
pub use output::{DataFrame, OutputFormat, QueryResult, Tabular};
pub use schema::{Schema, SchemaDefinition, TableSchema, TypeAffinity};
pub use search::SearchOptions;
pub use value::{Row, SqlValue};
