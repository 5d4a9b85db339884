//! Per-entity inventory documents and their JSON text form.

use std::fmt;

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::{
    error::{DbError, Result},
    value::{parse_date, parse_datetime, Row, SqlValue},
};

/// Table name to rows, in insertion order. The primary table comes first and
/// keeps the entity key; other tables have the foreign key stripped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    tables: Vec<(String, Vec<Row>)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a table entry, replacing an existing entry in place.
    pub fn insert(&mut self, table: impl Into<String>, rows: Vec<Row>) {
        let table = table.into();
        match self.tables.iter_mut().find(|(name, _)| *name == table) {
            Some((_, slot)) => *slot = rows,
            None => self.tables.push((table, rows)),
        }
    }

    pub fn get(&self, table: &str) -> Option<&[Row]> {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, rows)| rows.as_slice())
    }

    pub fn contains(&self, table: &str) -> bool {
        self.get(table).is_some()
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[Row])> {
        self.tables
            .iter()
            .map(|(name, rows)| (name.as_str(), rows.as_slice()))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Key of the entity this document describes, taken from the first
    /// primary-table record. A document without one cannot be reloaded.
    pub fn entity_key(&self, primary_table: &str, primary_key: &str, origin: &str) -> Result<&SqlValue> {
        let rows = self.get(primary_table).ok_or_else(|| {
            DbError::malformed(origin, format!("no `{primary_table}` entry"))
        })?;
        let first = rows.first().ok_or_else(|| {
            DbError::malformed(origin, format!("`{primary_table}` entry is empty"))
        })?;
        match first.get(primary_key) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(DbError::malformed(
                origin,
                format!("`{primary_table}` record has no `{primary_key}` value"),
            )),
        }
    }

    pub fn check_encodable(&self) -> Result<()> {
        self.tables
            .iter()
            .flat_map(|(_, rows)| rows)
            .try_for_each(Row::check_encodable)
    }

    /// Converts every string that reads as an ISO date-time or date.
    pub fn parse_datetimes(&mut self) {
        for (_, rows) in &mut self.tables {
            parse_row_datetimes(rows);
        }
    }

    pub fn into_tables(self) -> Vec<(String, Vec<Row>)> {
        self.tables
    }
}

/// Heuristic date recovery. Any string shaped like a date is converted,
/// free-text columns included.
pub fn parse_row_datetimes(rows: &mut [Row]) {
    for value in rows.iter_mut().flat_map(Row::values_mut) {
        let parsed = match value {
            SqlValue::Text(text) => parse_datetime(text)
                .map(SqlValue::DateTime)
                .or_else(|| parse_date(text).map(SqlValue::Date)),
            _ => None,
        };
        if let Some(parsed) = parsed {
            *value = parsed;
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tables.len()))?;
        for (table, rows) in &self.tables {
            map.serialize_entry(table, rows)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = Document;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping table names to arrays of rows")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Document, A::Error> {
                let mut document = Document::new();
                while let Some((table, rows)) = access.next_entry::<String, Vec<Row>>()? {
                    document.insert(table, rows);
                }
                Ok(document)
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

pub fn serialize(document: &Document) -> Result<String> {
    document.check_encodable()?;
    to_pretty_json(document)
}

pub fn deserialize(text: &str, parse_dates: bool) -> Result<Document> {
    let mut document: Document = serde_json::from_str(text)?;
    if parse_dates {
        document.parse_datetimes();
    }
    Ok(document)
}

/// Reference-table files are a flat array of rows.
pub fn serialize_rows(rows: &[Row]) -> Result<String> {
    rows.iter().try_for_each(Row::check_encodable)?;
    to_pretty_json(&rows)
}

pub fn deserialize_rows(text: &str, parse_dates: bool) -> Result<Vec<Row>> {
    let mut rows: Vec<Row> = serde_json::from_str(text)?;
    if parse_dates {
        parse_row_datetimes(&mut rows);
    }
    Ok(rows)
}

fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| DbError::InvalidUtf8(e.utf8_error()))
}
