//! Writes the catalog to a flat directory: one file per reference table and
//! one inventory document per primary entity.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{
    database::Database,
    document,
    error::{DbError, Result},
    value::SqlValue,
};

pub const DOCUMENT_EXTENSION: &str = "json";

/// What to do when an entity key cannot get a file of its own: two keys
/// normalize to the same name, a key claims a reference-table file, or the
/// normalized name is empty, hidden or contains a path separator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Log and continue. Colliding entities overwrite the earlier file;
    /// entities without a usable name are skipped.
    #[default]
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Remove every file in the target directory first. Destructive.
    pub clear: bool,
    pub collisions: CollisionPolicy,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            clear: true,
            collisions: CollisionPolicy::Warn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameCollision {
    pub file_name: String,
    pub first: String,
    pub second: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub reference_files: Vec<PathBuf>,
    pub entity_files: Vec<PathBuf>,
    pub collisions: Vec<FilenameCollision>,
    /// Entity keys with no usable file name.
    pub skipped_entities: Vec<String>,
}

/// `2MASS J13571237+1428398` becomes `2mass_j13571237+1428398.json`.
pub fn entity_file_name(entity: &str) -> String {
    format!("{}.{DOCUMENT_EXTENSION}", entity_stem(entity))
}

fn entity_stem(entity: &str) -> String {
    entity
        .replace('*', "")
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Stems the loader would skip, or that resolve outside the directory.
fn is_unusable_stem(stem: &str) -> bool {
    stem.is_empty() || stem.starts_with('.') || stem.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

pub fn reference_file_name(table: &str) -> String {
    format!("{table}.{DOCUMENT_EXTENSION}")
}

/// Deletes the regular files directly inside `dir`. Subdirectories stay.
pub fn clear_directory(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    debug!(dir = %dir.display(), removed, "Cleared export directory");
    Ok(removed)
}

impl Database {
    /// File names are settled for every entity before the directory is
    /// touched, so a strict export fails without clearing or writing.
    pub fn save_database(&self, dir: &Path, options: &ExportOptions) -> Result<ExportSummary> {
        self.classifier.require_foreign_keys()?;
        let mut summary = ExportSummary::default();
        let entities = self.plan_entity_files(options.collisions, &mut summary)?;

        fs::create_dir_all(dir)?;
        if options.clear {
            clear_directory(dir)?;
        }

        for table in self.classifier.reference_tables() {
            if let Some(path) = self.save_reference_table(table, dir)? {
                summary.reference_files.push(path);
            }
        }

        for (key, file_name) in entities {
            let path = self.write_entity(key, &dir.join(file_name))?;
            summary.entity_files.push(path);
        }

        info!(
            dir = %dir.display(),
            reference_files = summary.reference_files.len(),
            entity_files = summary.entity_files.len(),
            collisions = summary.collisions.len(),
            skipped = summary.skipped_entities.len(),
            "Saved database"
        );
        Ok(summary)
    }

    fn plan_entity_files(
        &self,
        policy: CollisionPolicy,
        summary: &mut ExportSummary,
    ) -> Result<Vec<(SqlValue, String)>> {
        let classifier = &self.classifier;
        // Reference files claim their names first, compared in lower case.
        let mut claimed: HashMap<String, String> = classifier
            .config()
            .reference_tables
            .iter()
            .map(|table| (reference_file_name(table).to_lowercase(), table.clone()))
            .collect();

        let mut planned = Vec::new();
        for row in self.table(classifier.primary_table())?.rows()? {
            let key = match row.get(classifier.primary_key()) {
                Some(value) if !value.is_null() => value.clone(),
                _ => {
                    warn!(
                        table = %classifier.primary_table(),
                        "Skipping primary row without a key"
                    );
                    continue;
                }
            };
            let entity = key.to_string();
            let stem = entity_stem(&entity);
            let file_name = format!("{stem}.{DOCUMENT_EXTENSION}");

            if is_unusable_stem(&stem) {
                if policy == CollisionPolicy::Error {
                    return Err(DbError::UnusableFileName { entity, file_name });
                }
                warn!(
                    entity = %entity,
                    file = %file_name,
                    "Entity key has no usable file name; skipping"
                );
                summary.skipped_entities.push(entity);
                continue;
            }

            if let Some(first) = claimed.get(&file_name) {
                if policy == CollisionPolicy::Error {
                    return Err(DbError::FilenameCollision {
                        file_name,
                        first: first.clone(),
                        second: entity,
                    });
                }
                warn!(
                    file = %file_name,
                    first = %first,
                    second = %entity,
                    "Entity file name collision; overwriting"
                );
                summary.collisions.push(FilenameCollision {
                    file_name: file_name.clone(),
                    first: first.clone(),
                    second: entity.clone(),
                });
            }

            claimed.insert(file_name.clone(), entity);
            planned.push((key, file_name));
        }
        Ok(planned)
    }

    /// Writes `{table}.json`. Returns `None` when the table has no rows.
    pub fn save_reference_table(&self, table: &str, dir: &Path) -> Result<Option<PathBuf>> {
        let rows = self.table(table)?.rows()?;
        if rows.is_empty() {
            debug!(table = %table, "Reference table is empty; no file written");
            return Ok(None);
        }
        let path = dir.join(reference_file_name(table));
        fs::write(&path, document::serialize_rows(&rows)?)?;
        debug!(table = %table, rows = rows.len(), path = %path.display(), "Saved reference table");
        Ok(Some(path))
    }

    /// Writes one entity's inventory document into `dir`.
    pub fn save_json(&self, entity: impl Into<SqlValue>, dir: &Path) -> Result<PathBuf> {
        let entity = entity.into();
        let name = entity.to_string();
        let stem = entity_stem(&name);
        if is_unusable_stem(&stem) {
            return Err(DbError::UnusableFileName {
                file_name: entity_file_name(&name),
                entity: name,
            });
        }
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{stem}.{DOCUMENT_EXTENSION}"));
        self.write_entity(entity, &path)
    }

    fn write_entity(&self, entity: SqlValue, path: &Path) -> Result<PathBuf> {
        let document = self.inventory(entity)?;
        fs::write(path, document::serialize(&document)?)?;
        debug!(path = %path.display(), tables = document.len(), "Saved entity document");
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use crate::{fixtures, value::Row};

    use super::*;

    #[test]
    fn entity_file_names_are_normalized() {
        assert_eq!(
            entity_file_name("2MASS J13571237+1428398"),
            "2mass_j13571237+1428398.json"
        );
        assert_eq!(entity_file_name("  *V* TW Hya "), "v_tw_hya.json");
        assert_eq!(entity_file_name("HD\t1234"), "hd_1234.json");
    }

    #[test]
    fn export_writes_reference_and_entity_files() {
        let db = fixtures::example_database();
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("stale.json"), "{}").expect("stale file");

        let summary = db
            .save_database(dir.path(), &ExportOptions::default())
            .expect("save");

        assert!(!dir.path().join("stale.json").exists());
        assert_eq!(
            summary.reference_files,
            [dir.path().join("Publications.json"), dir.path().join("Telescopes.json")]
        );
        assert!(!dir.path().join("Instruments.json").exists());

        let publications = fs::read_to_string(dir.path().join("Publications.json")).expect("read");
        assert_eq!(
            document::deserialize_rows(&publications, false)
                .expect("rows")
                .len(),
            2
        );

        let entity_path = dir.path().join("2mass_j13571237+1428398.json");
        assert_eq!(summary.entity_files, [entity_path.clone()]);
        let text = fs::read_to_string(entity_path).expect("read entity");
        let document = document::deserialize(&text, false).expect("document");
        assert_eq!(document, db.inventory(fixtures::SOURCE).expect("inventory"));
    }

    #[test]
    fn keep_existing_files_when_not_clearing() {
        let db = fixtures::example_database();
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("notes.txt"), "keep").expect("notes");
        let options = ExportOptions {
            clear: false,
            ..ExportOptions::default()
        };
        db.save_database(dir.path(), &options).expect("save");
        assert!(dir.path().join("notes.txt").exists());
    }

    fn add_source(db: &Database, source: &str) {
        db.table("Sources")
            .expect("sources")
            .insert(&[Row::new().with("source", source).with("reference", "Schm10")])
            .expect("insert source");
    }

    #[test]
    fn collisions_are_reported() {
        let db = fixtures::example_database();
        add_source(&db, "2mass j13571237+1428398");
        let dir = tempfile::tempdir().expect("tempdir");

        let summary = db
            .save_database(dir.path(), &ExportOptions::default())
            .expect("save");
        assert_eq!(summary.collisions.len(), 1);
        assert_eq!(summary.collisions[0].file_name, "2mass_j13571237+1428398.json");

        let strict = ExportOptions {
            collisions: CollisionPolicy::Error,
            ..ExportOptions::default()
        };
        assert!(matches!(
            db.save_database(dir.path(), &strict),
            Err(DbError::FilenameCollision { .. })
        ));
    }

    #[test]
    fn keys_without_a_usable_file_name_are_skipped() {
        let db = fixtures::example_database();
        for source in ["*", "  ", ".hidden", "a/b", "..\\up"] {
            add_source(&db, source);
        }
        let workspace = tempfile::tempdir().expect("tempdir");
        let dir = workspace.path().join("data");

        let summary = db
            .save_database(&dir, &ExportOptions::default())
            .expect("save");
        let mut skipped = summary.skipped_entities.clone();
        skipped.sort();
        assert_eq!(skipped, ["  ", "*", "..\\up", ".hidden", "a/b"]);
        assert_eq!(summary.entity_files, [dir.join("2mass_j13571237+1428398.json")]);
        assert!(!dir.join(".json").exists());
        assert!(!dir.join("a").exists());
        assert_eq!(fs::read_dir(workspace.path()).expect("workspace").count(), 1);

        assert!(matches!(
            db.save_json("a/b", &dir),
            Err(DbError::UnusableFileName { entity, .. }) if entity == "a/b"
        ));
    }

    #[test]
    fn strict_export_fails_before_touching_the_directory() {
        let db = fixtures::example_database();
        add_source(&db, "*");
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("stale.json"), "{}").expect("stale file");

        let strict = ExportOptions {
            collisions: CollisionPolicy::Error,
            ..ExportOptions::default()
        };
        match db.save_database(dir.path(), &strict) {
            Err(DbError::UnusableFileName { entity, file_name }) => {
                assert_eq!(entity, "*");
                assert_eq!(file_name, ".json");
            }
            other => panic!("expected unusable file name, got {other:?}"),
        }
        assert!(dir.path().join("stale.json").exists());
        assert!(!dir.path().join("Publications.json").exists());
    }

    #[test]
    fn entity_cannot_claim_a_reference_file() {
        let db = fixtures::example_database();
        add_source(&db, "Publications");
        let dir = tempfile::tempdir().expect("tempdir");

        let summary = db
            .save_database(dir.path(), &ExportOptions::default())
            .expect("save");
        assert_eq!(
            summary.collisions,
            [FilenameCollision {
                file_name: "publications.json".to_string(),
                first: "Publications".to_string(),
                second: "Publications".to_string(),
            }]
        );

        let strict = ExportOptions {
            collisions: CollisionPolicy::Error,
            ..ExportOptions::default()
        };
        assert!(matches!(
            db.save_database(dir.path(), &strict),
            Err(DbError::FilenameCollision { first, .. }) if first == "Publications"
        ));
    }

    #[test]
    fn unlinked_tables_block_export() {
        let db = fixtures::unlinked_database();
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            db.save_database(dir.path(), &ExportOptions::default()),
            Err(DbError::ColumnNotFound { table, .. }) if table == "Regimes"
        ));
        assert_eq!(
            db.save_reference_table("Publications", dir.path())
                .expect("reference table"),
            Some(dir.path().join("Publications.json"))
        );
    }
}
