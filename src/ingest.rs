//! Bulk row ingestion from delimited text or in-memory tables.

use std::io::Read;

use tracing::info;

use crate::{
    database::{Database, TableHandle},
    error::{DbError, Result},
    output::{DataFrame, Tabular},
    schema::TypeAffinity,
    value::{Row, SqlValue},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Table,
    DataFrame,
}

impl DataFormat {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "table" | "astropy" => Ok(Self::Table),
            "dataframe" | "pandas" => Ok(Self::DataFrame),
            _ => Err(DbError::UnsupportedFormat(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Table => "table",
            Self::DataFrame => "dataframe",
        }
    }
}

#[derive(Debug, Clone)]
pub enum TableData {
    /// CSV text with a header row.
    Delimited(String),
    Tabular(Tabular),
    Frame(DataFrame),
}

impl TableData {
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Ok(Self::Delimited(text))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Delimited(_) => "delimited text",
            Self::Tabular(_) => "table",
            Self::Frame(_) => "data frame",
        }
    }

    fn into_rows(self, format: DataFormat) -> Result<Vec<Row>> {
        match (format, self) {
            (DataFormat::Csv, Self::Delimited(text)) => parse_csv(&text),
            (DataFormat::Table, Self::Tabular(table)) => {
                table.check_shape()?;
                Ok(table.into_rows())
            }
            (DataFormat::DataFrame, Self::Frame(frame)) => {
                frame.check_shape()?;
                Ok(frame.into_rows())
            }
            (format, data) => Err(DbError::FormatMismatch {
                format: format.as_str().to_string(),
                input: data.kind_name(),
            }),
        }
    }
}

fn parse_csv(text: &str) -> Result<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(ToString::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(column, field)| {
                let value = if field.is_empty() {
                    SqlValue::Null
                } else {
                    SqlValue::from(field)
                };
                (column.clone(), value)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

impl Database {
    /// Inserts rows into `table`. Rows whose foreign key names no existing
    /// primary entity are reported together and nothing is written.
    pub fn add_table_data(&mut self, table: &str, data: TableData, format: &str) -> Result<usize> {
        let format = DataFormat::parse(format)?;
        let Database {
            conn,
            schema,
            classifier,
        } = self;
        let target = schema.require(table)?;
        let rows = data.into_rows(format)?;

        let tx = conn.transaction()?;
        let foreign_key = classifier.foreign_key();
        if table != classifier.primary_table() && target.has_column(foreign_key) {
            let primary = TableHandle::new(&tx, schema.require(classifier.primary_table())?);
            let key_affinity = primary
                .schema()
                .column(classifier.primary_key())
                .map(|c| c.affinity)
                .unwrap_or(TypeAffinity::Numeric);

            let mut missing: Vec<String> = Vec::new();
            for value in rows.iter().filter_map(|row| row.get(foreign_key)) {
                let key = value.clone().coerce(key_affinity);
                let label = key.to_string();
                if missing.contains(&label) {
                    continue;
                }
                if key.is_null() || !primary.contains(classifier.primary_key(), &key)? {
                    missing.push(label);
                }
            }
            if !missing.is_empty() {
                return Err(DbError::MissingPrimaryKeys {
                    table: table.to_string(),
                    keys: missing,
                });
            }
        }

        let inserted = TableHandle::new(&tx, target).insert(&rows)?;
        tx.commit()?;
        info!(table = %table, rows = inserted, format = format.as_str(), "Added table data");
        Ok(inserted)
    }
}
