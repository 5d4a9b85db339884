//! Partitions catalog tables into the primary table, shared reference tables
//! and per-entity data tables.

use tracing::warn;

use crate::{
    config::CatalogConfig,
    error::{DbError, Result},
    schema::Schema,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Primary,
    Reference,
    Data,
}

#[derive(Debug, Clone)]
pub struct TableClassifier {
    config: CatalogConfig,
    tables: Vec<String>,
    reference: Vec<String>,
    data: Vec<String>,
    /// Data tables lacking the foreign-key column.
    unlinked: Vec<String>,
}

impl TableClassifier {
    /// Classifies every reflected table. The primary table must exist with its
    /// key column. Data tables without the foreign key are recorded; operations
    /// that link rows to entities fail on them later.
    pub fn new(schema: &Schema, config: CatalogConfig) -> Result<Self> {
        let primary = schema.require(&config.primary_table)?;
        primary.require_column(&config.primary_table_key)?;

        let reference: Vec<String> = config
            .reference_tables
            .iter()
            .filter(|name| schema.table(name).is_some())
            .cloned()
            .collect();

        let mut data = Vec::new();
        let mut unlinked = Vec::new();
        for table in schema.tables() {
            if table.name == config.primary_table || reference.contains(&table.name) {
                continue;
            }
            if !table.has_column(&config.foreign_key) {
                warn!(
                    table = %table.name,
                    column = %config.foreign_key,
                    "Data table has no foreign-key column"
                );
                unlinked.push(table.name.clone());
            }
            data.push(table.name.clone());
        }

        Ok(Self {
            tables: schema.table_names().map(ToString::to_string).collect(),
            config,
            reference,
            data,
            unlinked,
        })
    }

    pub fn kind(&self, table: &str) -> Option<TableKind> {
        if table == self.config.primary_table {
            Some(TableKind::Primary)
        } else if self.reference.iter().any(|t| t == table) {
            Some(TableKind::Reference)
        } else if self.data.iter().any(|t| t == table) {
            Some(TableKind::Data)
        } else {
            None
        }
    }

    pub fn require_table(&self, table: &str) -> Result<TableKind> {
        self.kind(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn primary_table(&self) -> &str {
        &self.config.primary_table
    }

    pub fn primary_key(&self) -> &str {
        &self.config.primary_table_key
    }

    pub fn foreign_key(&self) -> &str {
        &self.config.foreign_key
    }

    /// Configured reference tables present in the catalog, in configured order.
    pub fn reference_tables(&self) -> &[String] {
        &self.reference
    }

    /// Data tables in catalog order.
    pub fn data_tables(&self) -> &[String] {
        &self.data
    }

    pub fn unlinked_tables(&self) -> &[String] {
        &self.unlinked
    }

    /// Fails on the first data table that cannot be tied to an entity.
    pub fn require_foreign_keys(&self) -> Result<()> {
        match self.unlinked.first() {
            Some(table) => Err(DbError::column_not_found(table, self.foreign_key())),
            None => Ok(()),
        }
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// True for any configured reference table name, present or not.
    pub fn is_reference_name(&self, name: &str) -> bool {
        self.config.reference_tables.iter().any(|t| t == name)
    }

    /// Column linking rows of `table` to the primary entity.
    pub fn entity_column(&self, table: &str) -> Result<&str> {
        match self.require_table(table)? {
            TableKind::Primary => Ok(self.primary_key()),
            TableKind::Data if self.unlinked.iter().any(|t| t == table) => {
                Err(DbError::column_not_found(table, self.foreign_key()))
            }
            TableKind::Data => Ok(self.foreign_key()),
            TableKind::Reference => Err(DbError::column_not_found(table, self.foreign_key())),
        }
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;
    use crate::schema::SchemaDefinition;

    fn example_schema() -> Schema {
        let conn = Connection::open_in_memory().expect("in-memory db");
        SchemaDefinition::example().apply(&conn).expect("apply schema");
        Schema::reflect(&conn).expect("reflect")
    }

    #[test]
    fn partitions_example_catalog() {
        let classifier =
            TableClassifier::new(&example_schema(), CatalogConfig::default()).expect("classify");

        assert_eq!(classifier.kind("Sources"), Some(TableKind::Primary));
        assert_eq!(
            classifier.reference_tables(),
            ["Publications", "Telescopes", "Instruments"]
        );
        assert_eq!(
            classifier.data_tables(),
            ["Names", "Photometry", "SpectralTypes"]
        );
        assert!(classifier.unlinked_tables().is_empty());
        assert!(classifier.require_foreign_keys().is_ok());
        assert!(classifier.is_reference_name("Versions"));
        assert_eq!(classifier.kind("Versions"), None);
    }

    #[test]
    fn unknown_tables_fail_with_their_name() {
        let classifier =
            TableClassifier::new(&example_schema(), CatalogConfig::default()).expect("classify");
        match classifier.require_table("Spectra") {
            Err(DbError::TableNotFound(name)) => assert_eq!(name, "Spectra"),
            other => panic!("expected table not found, got {other:?}"),
        }
        assert!(classifier.entity_column("Publications").is_err());
        assert_eq!(classifier.entity_column("Names").expect("names"), "source");
    }

    #[test]
    fn data_table_without_foreign_key_is_recorded() {
        let config = CatalogConfig {
            reference_tables: vec!["Publications".to_string()],
            ..CatalogConfig::default()
        };
        let classifier = TableClassifier::new(&example_schema(), config).expect("classify");
        assert_eq!(classifier.kind("Instruments"), Some(TableKind::Data));
        assert_eq!(classifier.unlinked_tables(), ["Instruments", "Telescopes"]);
        assert_eq!(classifier.entity_column("Names").expect("names"), "source");

        match classifier.entity_column("Instruments") {
            Err(DbError::ColumnNotFound { table, column }) => {
                assert_eq!(table, "Instruments");
                assert_eq!(column, "source");
            }
            other => panic!("expected column not found, got {other:?}"),
        }
        assert!(matches!(
            classifier.require_foreign_keys(),
            Err(DbError::ColumnNotFound { table, .. }) if table == "Instruments"
        ));
    }

    #[test]
    fn missing_primary_table_is_rejected() {
        let config = CatalogConfig {
            primary_table: "Objects".to_string(),
            ..CatalogConfig::default()
        };
        assert!(matches!(
            TableClassifier::new(&example_schema(), config),
            Err(DbError::TableNotFound(name)) if name == "Objects"
        ));
    }
}
