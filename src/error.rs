//! Error types for catalog access, export and reload.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Connection string names a store other than SQLite.
    #[error("Unsupported connection dialect `{0}`; only sqlite:// is available")]
    UnsupportedDialect(String),

    /// The store has no tables; a schema must be applied first.
    #[error("Database has no tables. Create database first (apply a schema with `create`)")]
    EmptyDatabase,

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Column `{column}` not found in table {table}")]
    ColumnNotFound { table: String, column: String },

    /// Rows reference primary entities that do not exist.
    #[error("Table {table}: missing {} primary key(s): {}", .keys.len(), .keys.join(", "))]
    MissingPrimaryKeys { table: String, keys: Vec<String> },

    /// Per-entity document cannot be reconstructed.
    #[error("Malformed document {origin}: {reason}")]
    MalformedDocument { origin: String, reason: String },

    #[error("Unsupported value of type {type_name}: {detail}")]
    UnsupportedValue {
        type_name: &'static str,
        detail: String,
    },

    #[error("Byte value is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Unsupported data format `{0}`. Supported: csv, table, dataframe")]
    UnsupportedFormat(String),

    #[error("Format `{format}` does not match the supplied {input} input")]
    FormatMismatch { format: String, input: &'static str },

    #[error("Entities `{first}` and `{second}` both export to {file_name}")]
    FilenameCollision {
        file_name: String,
        first: String,
        second: String,
    },

    /// Normalized name is empty, hidden or holds a path separator.
    #[error("Entity `{entity}` has no usable export file name (got `{file_name}`)")]
    UnusableFileName { entity: String, file_name: String },

    /// Columns or rows of an in-memory table differ in length.
    #[error("Ragged {input}: `{label}` has {found} values, expected {expected}")]
    RaggedData {
        input: &'static str,
        label: String,
        expected: usize,
        found: usize,
    },

    /// Alias lookup failed.
    #[error("Name resolver error: {0}")]
    Resolver(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl DbError {
    pub fn column_not_found(table: impl Into<String>, column: impl Into<String>) -> Self {
        DbError::ColumnNotFound {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn malformed(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        DbError::MalformedDocument {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised before any store access because a caller named
    /// an unknown table or column.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DbError::TableNotFound(_) | DbError::ColumnNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
