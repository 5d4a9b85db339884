//! Cell values and ordered row records.
//!
//! `SqlValue` covers what SQLite hands back plus the column types the catalog
//! schemas declare on top of it (booleans, dates, decimals). Coercion from a
//! column's [`TypeAffinity`] happens on read and again before every insert, so
//! values that travelled through JSON as plain strings or floats land back in
//! the store with the same representation they left with.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqliteValue, ValueRef};
use rust_decimal::{
    prelude::{FromPrimitive, ToPrimitive},
    Decimal,
};
use serde::{
    de::{self, MapAccess, Visitor},
    ser::{self, SerializeMap},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::{
    error::{DbError, Result},
    schema::TypeAffinity,
};

pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const DATETIME_INPUT_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Bytes(Vec<u8>),
    /// Fixed-point value. Encoded to JSON as a float, so precision beyond f64 is lost.
    Decimal(Decimal),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Integer(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Boolean(_) => "boolean",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Date(_) => "date",
            SqlValue::DateTime(_) => "datetime",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn from_sql_ref(value: ValueRef<'_>, affinity: TypeAffinity) -> Result<Self> {
        let value = match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(bytes) => SqlValue::Text(std::str::from_utf8(bytes)?.to_owned()),
            ValueRef::Blob(bytes) => SqlValue::Bytes(bytes.to_vec()),
        };
        Ok(value.coerce(affinity))
    }

    /// Converts the value toward the column's declared type. Values that do
    /// not parse are returned unchanged and left for the store to judge.
    pub fn coerce(self, affinity: TypeAffinity) -> Self {
        match (self, affinity) {
            (SqlValue::Text(text), TypeAffinity::Integer) => match text.trim().parse::<i64>() {
                Ok(v) => SqlValue::Integer(v),
                Err(_) => SqlValue::Text(text),
            },
            (SqlValue::Text(text), TypeAffinity::Real) => match text.trim().parse::<f64>() {
                Ok(v) => SqlValue::Real(v),
                Err(_) => SqlValue::Text(text),
            },
            (SqlValue::Integer(v), TypeAffinity::Real) => SqlValue::Real(v as f64),
            (SqlValue::Text(text), TypeAffinity::Boolean) => match parse_bool(&text) {
                Some(v) => SqlValue::Boolean(v),
                None => SqlValue::Text(text),
            },
            (SqlValue::Integer(v), TypeAffinity::Boolean) => SqlValue::Boolean(v != 0),
            (SqlValue::Text(text), TypeAffinity::DateTime) => match parse_datetime(&text) {
                Some(v) => SqlValue::DateTime(v),
                None => SqlValue::Text(text),
            },
            (SqlValue::Text(text), TypeAffinity::Date) => {
                match parse_date(&text).or_else(|| parse_datetime(&text).map(|v| v.date())) {
                    Some(v) => SqlValue::Date(v),
                    None => SqlValue::Text(text),
                }
            }
            (SqlValue::Text(text), TypeAffinity::Decimal) => match Decimal::from_str(text.trim()) {
                Ok(v) => SqlValue::Decimal(v),
                Err(_) => SqlValue::Text(text),
            },
            (SqlValue::Real(v), TypeAffinity::Decimal) => Decimal::from_f64(v)
                .map(SqlValue::Decimal)
                .unwrap_or(SqlValue::Real(v)),
            (SqlValue::Text(text), TypeAffinity::Blob) => SqlValue::Bytes(text.into_bytes()),
            (value, _) => value,
        }
    }

    /// Fails for values JSON cannot carry: non-finite floats, decimals outside
    /// the f64 range and byte strings that are not UTF-8.
    pub fn check_encodable(&self) -> Result<()> {
        match self {
            SqlValue::Real(v) if !v.is_finite() => Err(DbError::UnsupportedValue {
                type_name: self.type_name(),
                detail: format!("{v} has no JSON representation"),
            }),
            SqlValue::Decimal(v) if v.to_f64().is_none() => Err(DbError::UnsupportedValue {
                type_name: self.type_name(),
                detail: format!("{v} does not fit a JSON number"),
            }),
            SqlValue::Bytes(bytes) => {
                std::str::from_utf8(bytes)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in DATETIME_INPUT_FORMATS {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
            return Some(value);
        }
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|value| value.naive_utc())
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).ok()
}

pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Some(true),
        "0" | "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Boolean(v) => write!(f, "{v}"),
            SqlValue::Bytes(v) => f.write_str(&String::from_utf8_lossy(v)),
            SqlValue::Decimal(v) => write!(f, "{v}"),
            SqlValue::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
            SqlValue::DateTime(v) => write!(f, "{}", v.format(DATETIME_FORMAT)),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            SqlValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(SqliteValue::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(SqliteValue::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Boolean(v) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*v))),
            SqlValue::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            SqlValue::Decimal(v) => match v.to_f64() {
                Some(f) => ToSqlOutput::Owned(SqliteValue::Real(f)),
                None => ToSqlOutput::Owned(SqliteValue::Text(v.to_string())),
            },
            SqlValue::Date(v) => {
                ToSqlOutput::Owned(SqliteValue::Text(v.format(DATE_FORMAT).to_string()))
            }
            SqlValue::DateTime(v) => {
                ToSqlOutput::Owned(SqliteValue::Text(v.format(DATETIME_FORMAT).to_string()))
            }
        };
        Ok(output)
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Integer(v) => serializer.serialize_i64(*v),
            SqlValue::Real(v) if v.is_finite() => serializer.serialize_f64(*v),
            SqlValue::Real(v) => Err(ser::Error::custom(format!(
                "real value {v} has no JSON representation"
            ))),
            SqlValue::Text(v) => serializer.serialize_str(v),
            SqlValue::Boolean(v) => serializer.serialize_bool(*v),
            SqlValue::Bytes(v) => {
                let text = std::str::from_utf8(v).map_err(ser::Error::custom)?;
                serializer.serialize_str(text)
            }
            SqlValue::Decimal(v) => match v.to_f64() {
                Some(f) => serializer.serialize_f64(f),
                None => Err(ser::Error::custom(format!(
                    "decimal {v} does not fit a JSON number"
                ))),
            },
            SqlValue::Date(v) => serializer.collect_str(&v.format(DATE_FORMAT)),
            SqlValue::DateTime(v) => serializer.collect_str(&v.format(DATETIME_FORMAT)),
        }
    }
}

impl<'de> Deserialize<'de> for SqlValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SqlValueVisitor;

        impl<'de> Visitor<'de> for SqlValueVisitor {
            type Value = SqlValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a scalar cell value (null, boolean, number or string)")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<SqlValue, E> {
                Ok(SqlValue::Null)
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<SqlValue, E> {
                Ok(SqlValue::Null)
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> std::result::Result<SqlValue, D::Error> {
                SqlValue::deserialize(deserializer)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<SqlValue, E> {
                Ok(SqlValue::Boolean(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<SqlValue, E> {
                Ok(SqlValue::Integer(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<SqlValue, E> {
                Ok(i64::try_from(v)
                    .map(SqlValue::Integer)
                    .unwrap_or(SqlValue::Real(v as f64)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<SqlValue, E> {
                Ok(SqlValue::Real(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<SqlValue, E> {
                Ok(SqlValue::Text(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<SqlValue, E> {
                Ok(SqlValue::Text(v))
            }
        }

        deserializer.deserialize_any(SqlValueVisitor)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Boolean(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One table row: column name to value, in column order.
///
/// Equality ignores column order so rows read back from the store compare
/// equal to rows rebuilt from documents.
#[derive(Debug, Clone, Default)]
pub struct Row {
    fields: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builder form of [`Row::insert`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Sets a column, replacing an existing value in place.
    pub fn insert(
        &mut self,
        column: impl Into<String>,
        value: impl Into<SqlValue>,
    ) -> Option<SqlValue> {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((column, value));
                None
            }
        }
    }

    /// Appends without checking for an existing column of the same name.
    pub(crate) fn push(&mut self, column: String, value: SqlValue) {
        self.fields.push((column, value));
    }

    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        let pos = self.fields.iter().position(|(name, _)| name == column)?;
        Some(self.fields.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut SqlValue> {
        self.fields.iter_mut().map(|(_, value)| value)
    }

    pub fn check_encodable(&self) -> Result<()> {
        self.fields
            .iter()
            .try_for_each(|(_, value)| value.check_encodable())
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, value)| other.get(name) == Some(value))
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, SqlValue);
    type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (column, value) in &self.fields {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = Row;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a row record mapping column names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Row, A::Error> {
                let mut row = Row::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((column, value)) = access.next_entry::<String, SqlValue>()? {
                    row.insert(column, value);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}
