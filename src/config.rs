use std::{env, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_CONNECTION: &str = "sqlite:///astrodb.db";

/// Tables that do not link back to the primary table.
pub const REFERENCE_TABLES: [&str; 10] = [
    "Publications",
    "Telescopes",
    "Instruments",
    "Modes",
    "Filters",
    "PhotometryFilters",
    "Citations",
    "References",
    "Versions",
    "Parameters",
];
pub const PRIMARY_TABLE: &str = "Sources";
pub const PRIMARY_TABLE_KEY: &str = "source";
pub const FOREIGN_KEY: &str = "source";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchColumn {
    pub table: String,
    pub column: String,
}

impl SearchColumn {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Parses `Table.column`.
    pub fn parse(target: &str) -> Option<Self> {
        let (table, column) = target.trim().split_once('.')?;
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self::new(table, column))
    }
}

/// How catalog tables relate to the primary entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub primary_table: String,
    pub primary_table_key: String,
    pub foreign_key: String,
    pub reference_tables: Vec<String>,
    pub search_columns: Vec<SearchColumn>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            primary_table: PRIMARY_TABLE.to_string(),
            primary_table_key: PRIMARY_TABLE_KEY.to_string(),
            foreign_key: FOREIGN_KEY.to_string(),
            reference_tables: REFERENCE_TABLES.iter().map(|t| t.to_string()).collect(),
            search_columns: vec![
                SearchColumn::new("Sources", "source"),
                SearchColumn::new("Sources", "shortname"),
                SearchColumn::new("Names", "other_name"),
            ],
        }
    }
}

impl CatalogConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub connection_string: String,
    pub catalog: CatalogConfig,
    pub export_clear: bool,
    pub parse_dates: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connection_string = lookup("ASTRODB_CONNECTION")
            .map(|v| v.trim().trim_matches('"').trim_matches('\'').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_CONNECTION.to_string());

        let mut catalog = match lookup("ASTRODB_CATALOG_CONFIG") {
            Some(path) if !path.trim().is_empty() => {
                CatalogConfig::from_json_file(Path::new(path.trim()))?
            }
            _ => CatalogConfig::default(),
        };

        if let Some(v) = non_empty(lookup("ASTRODB_PRIMARY_TABLE")) {
            catalog.primary_table = v;
        }
        if let Some(v) = non_empty(lookup("ASTRODB_PRIMARY_KEY")) {
            catalog.primary_table_key = v;
        }
        if let Some(v) = non_empty(lookup("ASTRODB_FOREIGN_KEY")) {
            catalog.foreign_key = v;
        }
        if let Some(tables) = lookup("ASTRODB_REFERENCE_TABLES").map(|v| split_list(&v)) {
            catalog.reference_tables = tables;
        }
        if let Some(columns) = lookup("ASTRODB_SEARCH_COLUMNS") {
            catalog.search_columns = split_list(&columns)
                .iter()
                .filter_map(|target| SearchColumn::parse(target))
                .collect();
        }

        let export_clear = lookup("ASTRODB_EXPORT_CLEAR")
            .map(|v| flag(&v))
            .unwrap_or(true);

        let parse_dates = lookup("ASTRODB_PARSE_DATES")
            .map(|v| flag(&v))
            .unwrap_or(false);

        Ok(Self {
            connection_string,
            catalog,
            export_clear,
            parse_dates,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
