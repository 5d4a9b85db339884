//! Rebuilds the catalog from an exported directory.

use std::{
    fs,
    path::{Path, PathBuf},
};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::{
    classify::TableClassifier,
    database::{Database, TableHandle},
    document::{self, Document},
    error::Result,
    export::{reference_file_name, DOCUMENT_EXTENSION},
    schema::Schema,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Convert date-shaped strings before insert.
    pub parse_dates: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub cleared_tables: usize,
    pub reference_tables: Vec<String>,
    pub skipped_reference_tables: Vec<String>,
    pub documents: usize,
    pub rows: usize,
}

impl Database {
    /// Empties every table, then loads reference files and entity documents
    /// from `dir`. Runs in one transaction; on error the store is unchanged.
    pub fn load_database(&mut self, dir: &Path, options: &LoadOptions) -> Result<LoadSummary> {
        let Database {
            conn,
            schema,
            classifier,
        } = self;
        classifier.require_foreign_keys()?;
        let tx = conn.transaction()?;
        let mut summary = LoadSummary::default();

        for table in schema.sorted_tables().into_iter().rev() {
            let deleted = TableHandle::new(&tx, table).delete_all()?;
            debug!(table = %table.name, rows = deleted, "Cleared table");
            summary.cleared_tables += 1;
        }

        for table in classifier.reference_tables() {
            let path = dir.join(reference_file_name(table));
            if !path.is_file() {
                info!(table = %table, path = %path.display(), "No reference file; skipping");
                summary.skipped_reference_tables.push(table.clone());
                continue;
            }
            summary.rows += load_reference_file(&tx, schema, table, &path, options.parse_dates)?;
            summary.reference_tables.push(table.clone());
        }

        for path in entity_files(dir, classifier)? {
            summary.rows += load_document_file(&tx, schema, classifier, &path, options.parse_dates)?;
            summary.documents += 1;
        }

        tx.commit()?;
        info!(
            dir = %dir.display(),
            reference_tables = summary.reference_tables.len(),
            documents = summary.documents,
            rows = summary.rows,
            "Loaded database"
        );
        Ok(summary)
    }

    /// Appends the rows of `{table}.json` in `dir` to `table`.
    pub fn load_table(&mut self, table: &str, dir: &Path, options: &LoadOptions) -> Result<usize> {
        let Database { conn, schema, .. } = self;
        schema.require(table)?;
        let tx = conn.transaction()?;
        let rows = load_reference_file(
            &tx,
            schema,
            table,
            &dir.join(reference_file_name(table)),
            options.parse_dates,
        )?;
        tx.commit()?;
        Ok(rows)
    }

    /// Inserts a single entity document.
    pub fn load_json(&mut self, path: &Path, options: &LoadOptions) -> Result<usize> {
        let Database {
            conn,
            schema,
            classifier,
        } = self;
        let tx = conn.transaction()?;
        let rows = load_document_file(&tx, schema, classifier, path, options.parse_dates)?;
        tx.commit()?;
        Ok(rows)
    }
}

fn load_reference_file(
    conn: &Connection,
    schema: &Schema,
    table: &str,
    path: &Path,
    parse_dates: bool,
) -> Result<usize> {
    let text = fs::read_to_string(path)?;
    let rows = document::deserialize_rows(&text, parse_dates)?;
    let inserted = TableHandle::new(conn, schema.require(table)?).insert(&rows)?;
    debug!(table = %table, rows = inserted, "Loaded reference table");
    Ok(inserted)
}

fn load_document_file(
    conn: &Connection,
    schema: &Schema,
    classifier: &TableClassifier,
    path: &Path,
    parse_dates: bool,
) -> Result<usize> {
    let text = fs::read_to_string(path)?;
    let document = document::deserialize(&text, parse_dates)?;
    insert_document(conn, schema, classifier, document, &path.display().to_string())
}

/// Primary rows go in first so every dependent row finds its key; the
/// stripped foreign key is restored from the first primary record.
fn insert_document(
    conn: &Connection,
    schema: &Schema,
    classifier: &TableClassifier,
    document: Document,
    origin: &str,
) -> Result<usize> {
    let primary_table = classifier.primary_table();
    let key = document
        .entity_key(primary_table, classifier.primary_key(), origin)?
        .clone();

    let tables = document.into_tables();
    let mut inserted = 0;
    if let Some((_, rows)) = tables.iter().find(|(name, _)| name == primary_table) {
        inserted += TableHandle::new(conn, schema.require(primary_table)?).insert(rows)?;
    }

    for (table, mut rows) in tables {
        if table == primary_table {
            continue;
        }
        let handle = TableHandle::new(conn, schema.require(&table)?);
        for row in &mut rows {
            row.insert(classifier.foreign_key(), key.clone());
        }
        inserted += handle.insert(&rows)?;
    }
    debug!(entity = %key, rows = inserted, "Loaded entity document");
    Ok(inserted)
}

/// Visible `.json` files that are not reference-table files, in name order.
fn entity_files(dir: &Path, classifier: &TableClassifier) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if classifier.is_reference_name(stem) {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}
