//! Schema catalog reflected from the store, plus the explicit schema
//! registration object used to create a store.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DbError, Result};

/// Column type family derived from the declared SQL type.
///
/// Follows SQLite's affinity rules, with the catalog's boolean, date and
/// decimal declarations split out so values can be recovered on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeAffinity {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Date,
    DateTime,
    Decimal,
    /// No declared type, or one SQLite treats as NUMERIC. Values pass through.
    Numeric,
}

impl TypeAffinity {
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.is_empty() {
            Self::Numeric
        } else if upper.contains("BOOL") {
            Self::Boolean
        } else if upper.contains("DATETIME") || upper.contains("TIMESTAMP") {
            Self::DateTime
        } else if upper.starts_with("DATE") {
            Self::Date
        } else if upper.contains("DECIMAL") || upper.contains("NUMERIC") {
            Self::Decimal
        } else if upper.contains("INT") {
            Self::Integer
        } else if ["CHAR", "CLOB", "TEXT"].iter().any(|t| upper.contains(t)) {
            Self::Text
        } else if upper.contains("BLOB") {
            Self::Blob
        } else if ["REAL", "FLOA", "DOUB"].iter().any(|t| upper.contains(t)) {
            Self::Real
        } else {
            Self::Numeric
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub affinity: TypeAffinity,
    pub not_null: bool,
    /// 1-based position within the primary key, 0 when not part of it.
    pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyRef {
    pub column: String,
    pub references_table: String,
    /// `None` when the constraint targets the referenced table's primary key.
    pub references_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKeyRef>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn require_column(&self, name: &str) -> Result<&ColumnInfo> {
        self.column(name)
            .ok_or_else(|| DbError::column_not_found(&self.name, name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn primary_key(&self) -> Vec<&str> {
        let mut keyed: Vec<&ColumnInfo> =
            self.columns.iter().filter(|c| c.primary_key > 0).collect();
        keyed.sort_by_key(|c| c.primary_key);
        keyed.into_iter().map(|c| c.name.as_str()).collect()
    }

    /// Tables this one references, excluding itself.
    pub fn dependencies(&self) -> BTreeSet<&str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.references_table.as_str())
            .filter(|table| *table != self.name)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schema {
    tables: Vec<TableSchema>,
}

impl Schema {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// Reads table, column and foreign-key metadata from the connection.
    /// Tables come back in name order.
    pub fn reflect(conn: &Connection) -> Result<Self> {
        let names = {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            tables.push(reflect_table(conn, name)?);
        }
        debug!(tables = tables.len(), "Reflected schema");
        Ok(Self { tables })
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&TableSchema> {
        self.table(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    /// Dependency order: every table comes after the tables it references.
    /// Ties resolve by name; tables caught in a reference cycle go last.
    pub fn sorted_tables(&self) -> Vec<&TableSchema> {
        let mut pending: BTreeMap<&str, BTreeSet<&str>> = self
            .tables
            .iter()
            .map(|t| {
                let deps = t
                    .dependencies()
                    .into_iter()
                    .filter(|dep| self.table(dep).is_some())
                    .collect();
                (t.name.as_str(), deps)
            })
            .collect();

        let mut ordered: Vec<&str> = Vec::with_capacity(self.tables.len());
        loop {
            let ready: Vec<&str> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();
            if ready.is_empty() {
                break;
            }
            for name in ready {
                pending.remove(name);
                for deps in pending.values_mut() {
                    deps.remove(name);
                }
                ordered.push(name);
            }
        }

        if !pending.is_empty() {
            warn!(
                tables = ?pending.keys().collect::<Vec<_>>(),
                "Foreign key cycle; ordering remaining tables by name"
            );
            ordered.extend(pending.keys().copied());
        }

        ordered
            .into_iter()
            .filter_map(|name| self.table(name))
            .collect()
    }
}

fn reflect_table(conn: &Connection, name: String) -> Result<TableSchema> {
    let columns = {
        let mut stmt = conn.prepare(
            "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let rows = stmt.query_map(params![name], |row| {
            let declared_type = row.get::<_, Option<String>>(1)?.unwrap_or_default();
            Ok(ColumnInfo {
                name: row.get(0)?,
                affinity: TypeAffinity::from_declared(&declared_type),
                declared_type,
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)?.max(0) as u32,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let foreign_keys = {
        let mut stmt = conn.prepare(
            "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
        )?;
        let rows = stmt.query_map(params![name], |row| {
            Ok(ForeignKeyRef {
                column: row.get(0)?,
                references_table: row.get(1)?,
                references_column: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    Ok(TableSchema {
        name,
        columns,
        foreign_keys,
    })
}

/// DDL registered for a store, applied explicitly to a connection.
#[derive(Debug, Clone, Default)]
pub struct SchemaDefinition {
    statements: Vec<String>,
}

impl SchemaDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, ddl: impl Into<String>) -> Self {
        self.statements.push(ddl.into());
        self
    }

    /// A whole SQL script, executed as one batch.
    pub fn from_script(script: impl Into<String>) -> Self {
        Self::new().table(script)
    }

    pub fn apply(&self, conn: &Connection) -> Result<()> {
        for statement in &self.statements {
            conn.execute_batch(statement)?;
        }
        debug!(statements = self.statements.len(), "Applied schema definition");
        Ok(())
    }

    /// Sources with names, photometry and spectral types, backed by
    /// publication, telescope and instrument reference tables.
    pub fn example() -> Self {
        EXAMPLE_TABLES
            .iter()
            .fold(Self::new(), |schema, ddl| schema.table(*ddl))
    }
}

const EXAMPLE_TABLES: [&str; 7] = [
    "CREATE TABLE IF NOT EXISTS Publications (
        name VARCHAR(30) NOT NULL PRIMARY KEY,
        bibcode VARCHAR(100),
        doi VARCHAR(100),
        description VARCHAR(1000)
    )",
    "CREATE TABLE IF NOT EXISTS Telescopes (
        name VARCHAR(30) NOT NULL PRIMARY KEY,
        reference VARCHAR(30) REFERENCES Publications (name) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS Instruments (
        name VARCHAR(30) NOT NULL PRIMARY KEY,
        reference VARCHAR(30) REFERENCES Publications (name) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS Sources (
        source VARCHAR(100) NOT NULL PRIMARY KEY,
        ra FLOAT,
        dec FLOAT,
        shortname VARCHAR(30),
        reference VARCHAR(30) NOT NULL REFERENCES Publications (name) ON DELETE CASCADE,
        comments VARCHAR(1000)
    )",
    "CREATE TABLE IF NOT EXISTS Names (
        source VARCHAR(100) NOT NULL REFERENCES Sources (source) ON DELETE CASCADE,
        other_name VARCHAR(100) NOT NULL,
        PRIMARY KEY (source, other_name)
    )",
    "CREATE TABLE IF NOT EXISTS Photometry (
        source VARCHAR(100) NOT NULL REFERENCES Sources (source) ON DELETE CASCADE ON UPDATE CASCADE,
        band VARCHAR(30),
        ucd VARCHAR(100),
        magnitude FLOAT,
        magnitude_error FLOAT,
        telescope VARCHAR(30) REFERENCES Telescopes (name) ON DELETE CASCADE,
        instrument VARCHAR(30) REFERENCES Instruments (name) ON DELETE CASCADE,
        epoch VARCHAR(30),
        comments VARCHAR(1000),
        reference VARCHAR(30) NOT NULL REFERENCES Publications (name) ON DELETE CASCADE,
        PRIMARY KEY (source, band, reference)
    )",
    "CREATE TABLE IF NOT EXISTS SpectralTypes (
        source VARCHAR(100) NOT NULL REFERENCES Sources (source) ON DELETE CASCADE ON UPDATE CASCADE,
        spectral_type FLOAT,
        spectral_type_error FLOAT,
        regime VARCHAR(11) NOT NULL
            CHECK (regime IN ('optical', 'infrared', 'ultraviolet', 'radio')),
        best BOOLEAN,
        comments VARCHAR(1000),
        reference VARCHAR(30) NOT NULL REFERENCES Publications (name) ON DELETE CASCADE,
        PRIMARY KEY (source, regime, reference)
    )",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn example_schema() -> Schema {
        let conn = Connection::open_in_memory().expect("in-memory db");
        SchemaDefinition::example().apply(&conn).expect("apply schema");
        Schema::reflect(&conn).expect("reflect")
    }

    #[test]
    fn reflects_columns_keys_and_affinities() {
        let schema = example_schema();
        assert_eq!(
            schema.table_names().collect::<Vec<_>>(),
            [
                "Instruments",
                "Names",
                "Photometry",
                "Publications",
                "Sources",
                "SpectralTypes",
                "Telescopes"
            ]
        );

        let photometry = schema.require("Photometry").expect("photometry");
        assert_eq!(photometry.primary_key(), ["source", "band", "reference"]);
        assert_eq!(
            photometry.column("magnitude").map(|c| c.affinity),
            Some(TypeAffinity::Real)
        );
        assert!(photometry
            .foreign_keys
            .iter()
            .any(|fk| fk.column == "telescope" && fk.references_table == "Telescopes"));

        let spectral = schema.require("SpectralTypes").expect("spectral types");
        assert_eq!(
            spectral.column("best").map(|c| c.affinity),
            Some(TypeAffinity::Boolean)
        );
    }

    #[test]
    fn sorted_tables_put_referenced_tables_first() {
        let schema = example_schema();
        let order: Vec<&str> = schema
            .sorted_tables()
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();
        let pos = |name: &str| order.iter().position(|t| *t == name).expect(name);

        assert_eq!(order.len(), 7);
        assert_eq!(order[0], "Publications");
        assert!(pos("Sources") < pos("Names"));
        assert!(pos("Telescopes") < pos("Photometry"));
        assert!(pos("Instruments") < pos("Photometry"));
        assert!(pos("Sources") < pos("SpectralTypes"));
    }

    #[test]
    fn unknown_table_is_reported_by_name() {
        let schema = example_schema();
        match schema.require("Spectra") {
            Err(DbError::TableNotFound(name)) => assert_eq!(name, "Spectra"),
            other => panic!("expected table not found, got {other:?}"),
        }
    }

    #[test]
    fn affinity_from_declared_types() {
        assert_eq!(TypeAffinity::from_declared("VARCHAR(30)"), TypeAffinity::Text);
        assert_eq!(TypeAffinity::from_declared("BIGINT"), TypeAffinity::Integer);
        assert_eq!(TypeAffinity::from_declared("DATETIME"), TypeAffinity::DateTime);
        assert_eq!(TypeAffinity::from_declared("date"), TypeAffinity::Date);
        assert_eq!(TypeAffinity::from_declared("NUMERIC(10, 2)"), TypeAffinity::Decimal);
        assert_eq!(TypeAffinity::from_declared("DOUBLE PRECISION"), TypeAffinity::Real);
        assert_eq!(TypeAffinity::from_declared(""), TypeAffinity::Numeric);
    }
}
