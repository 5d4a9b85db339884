//! Store connection, reflected schema and per-table handles.

use std::path::Path;

use rusqlite::{params, types::ToSql, Connection, OpenFlags};
use tracing::{debug, info};

use crate::{
    classify::TableClassifier,
    config::CatalogConfig,
    error::{DbError, Result},
    output::{OutputFormat, QueryResult},
    schema::{Schema, SchemaDefinition, TableSchema, TypeAffinity},
    value::{Row, SqlValue},
};

/// A reflected catalog store. Tables are looked up by name through
/// [`Database::table`].
pub struct Database {
    pub(crate) conn: Connection,
    pub(crate) schema: Schema,
    pub(crate) classifier: TableClassifier,
}

impl Database {
    pub fn open(connection_string: &str, config: CatalogConfig) -> Result<Self> {
        let conn = open_connection(connection_string)?;
        let db = Self::from_connection(conn, config)?;
        info!(
            connection = %connection_string,
            tables = db.schema.len(),
            "Opened catalog database"
        );
        Ok(db)
    }

    pub fn from_connection(conn: Connection, config: CatalogConfig) -> Result<Self> {
        enable_foreign_keys(&conn)?;
        let schema = Schema::reflect(&conn)?;
        if schema.is_empty() {
            return Err(DbError::EmptyDatabase);
        }
        let classifier = TableClassifier::new(&schema, config)?;
        Ok(Self {
            conn,
            schema,
            classifier,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn classifier(&self) -> &TableClassifier {
        &self.classifier
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.schema.table_names()
    }

    pub fn table(&self, name: &str) -> Result<TableHandle<'_>> {
        Ok(TableHandle::new(&self.conn, self.schema.require(name)?))
    }

    /// Runs a raw query. Values come back as stored, with no column coercion.
    pub fn sql_query(&self, sql: &str, format: OutputFormat) -> Result<QueryResult> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<(String, TypeAffinity)> = stmt
            .column_names()
            .into_iter()
            .map(|name| (name.to_string(), TypeAffinity::Numeric))
            .collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_row(row, &columns)?);
        }
        let names = columns.into_iter().map(|(name, _)| name).collect();
        Ok(QueryResult::build(format, names, out))
    }
}

/// Borrowed view of one table, bound to a connection or open transaction.
#[derive(Clone, Copy)]
pub struct TableHandle<'a> {
    conn: &'a Connection,
    schema: &'a TableSchema,
}

impl<'a> TableHandle<'a> {
    pub fn new(conn: &'a Connection, schema: &'a TableSchema) -> Self {
        Self { conn, schema }
    }

    pub fn name(&self) -> &'a str {
        &self.schema.name
    }

    pub fn schema(&self) -> &'a TableSchema {
        self.schema
    }

    pub fn count(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(self.name()));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn rows(&self) -> Result<Vec<Row>> {
        self.select(None, &[])
    }

    pub fn rows_where(&self, column: &str, value: &SqlValue) -> Result<Vec<Row>> {
        self.schema.require_column(column)?;
        let filter = format!("{} = ?1", quote_ident(column));
        self.select(Some(&filter), &[value as &dyn ToSql])
    }

    pub fn contains(&self, column: &str, value: &SqlValue) -> Result<bool> {
        self.schema.require_column(column)?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
            quote_ident(self.name()),
            quote_ident(column)
        );
        let found: i64 = self.conn.query_row(&sql, params![value], |row| row.get(0))?;
        Ok(found != 0)
    }

    pub(crate) fn select(&self, filter: Option<&str>, params: &[&dyn ToSql]) -> Result<Vec<Row>> {
        let mut sql = format!("SELECT * FROM {}", quote_ident(self.name()));
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let columns: Vec<(String, TypeAffinity)> = stmt
            .column_names()
            .into_iter()
            .map(|name| {
                let affinity = self
                    .schema
                    .column(name)
                    .map(|c| c.affinity)
                    .unwrap_or(TypeAffinity::Numeric);
                (name.to_string(), affinity)
            })
            .collect();
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_row(row, &columns)?);
        }
        Ok(out)
    }

    /// Inserts rows through their named columns. Every column is checked
    /// against the table before anything is written, and values are coerced
    /// to the declared column type.
    pub fn insert(&self, rows: &[Row]) -> Result<usize> {
        for row in rows {
            for column in row.columns() {
                self.schema.require_column(column)?;
            }
        }

        let table = quote_ident(self.name());
        for row in rows {
            if row.is_empty() {
                self.conn
                    .execute(&format!("INSERT INTO {table} DEFAULT VALUES"), [])?;
                continue;
            }
            let columns: Vec<String> = row.columns().map(quote_ident).collect();
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            );
            let values: Vec<SqlValue> = row
                .iter()
                .map(|(column, value)| {
                    let affinity = self
                        .schema
                        .column(column)
                        .map(|c| c.affinity)
                        .unwrap_or(TypeAffinity::Numeric);
                    value.clone().coerce(affinity)
                })
                .collect();
            let mut stmt = self.conn.prepare_cached(&sql)?;
            stmt.execute(rusqlite::params_from_iter(values.iter()))?;
        }
        debug!(table = %self.name(), rows = rows.len(), "Inserted rows");
        Ok(rows.len())
    }

    pub fn delete_all(&self) -> Result<usize> {
        let deleted = self
            .conn
            .execute(&format!("DELETE FROM {}", quote_ident(self.name())), [])?;
        Ok(deleted)
    }
}

pub(crate) fn read_row(row: &rusqlite::Row<'_>, columns: &[(String, TypeAffinity)]) -> Result<Row> {
    let mut out = Row::with_capacity(columns.len());
    for (i, (name, affinity)) in columns.iter().enumerate() {
        out.push(name.clone(), SqlValue::from_sql_ref(row.get_ref(i)?, *affinity)?);
    }
    Ok(out)
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

enum Target<'a> {
    Memory,
    File(&'a str),
}

fn parse_connection_string(connection_string: &str) -> Result<Target<'_>> {
    let trimmed = connection_string.trim();
    let Some((scheme, rest)) = trimmed.split_once("://") else {
        return Ok(Target::File(trimmed));
    };
    let dialect = scheme.split('+').next().unwrap_or(scheme);
    if !dialect.eq_ignore_ascii_case("sqlite") {
        return Err(DbError::UnsupportedDialect(scheme.to_string()));
    }
    // sqlite:///relative.db and sqlite:////absolute.db; the host part is empty.
    let path = rest.strip_prefix('/').unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        Ok(Target::Memory)
    } else {
        Ok(Target::File(path))
    }
}

/// Opens a SQLite connection with foreign-key enforcement on.
pub fn open_connection(connection_string: &str) -> Result<Connection> {
    let conn = match parse_connection_string(connection_string)? {
        Target::Memory => Connection::open_in_memory()?,
        Target::File(path) => Connection::open_with_flags(
            Path::new(path),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?,
    };
    enable_foreign_keys(&conn)?;
    Ok(conn)
}

pub fn enable_foreign_keys(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Creates the store's tables from an explicit schema definition.
pub fn create_database(connection_string: &str, definition: &SchemaDefinition) -> Result<Connection> {
    let conn = open_connection(connection_string)?;
    definition.apply(&conn)?;
    info!(connection = %connection_string, "Created catalog database");
    Ok(conn)
}

/// Replays the source store's tables and indexes into the destination,
/// skipping tables that already exist there, and optionally copies rows.
pub fn copy_database_schema(source: &str, destination: &str, copy_data: bool) -> Result<usize> {
    let src = open_connection(source)?;
    let src_schema = Schema::reflect(&src)?;
    if src_schema.is_empty() {
        return Err(DbError::EmptyDatabase);
    }
    let mut dest = open_connection(destination)?;
    copy_into(&src, &src_schema, &mut dest, copy_data)
}

fn copy_into(src: &Connection, src_schema: &Schema, dest: &mut Connection, copy_data: bool) -> Result<usize> {
    let existing = Schema::reflect(dest)?;
    let tx = dest.transaction()?;

    let mut created = 0;
    for table in src_schema.sorted_tables() {
        if existing.table(&table.name).is_some() {
            debug!(table = %table.name, "Table already exists in destination");
            continue;
        }
        let ddl: String = src.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table.name],
            |row| row.get(0),
        )?;
        tx.execute_batch(&ddl)?;
        created += 1;

        let indexes = {
            let mut stmt = src.prepare(
                "SELECT sql FROM sqlite_master
                 WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
            )?;
            let rows = stmt.query_map(params![table.name], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for index in indexes {
            tx.execute_batch(&index)?;
        }
    }

    if copy_data {
        for table in src_schema.sorted_tables() {
            let rows = TableHandle::new(src, table).rows()?;
            TableHandle::new(&tx, table).insert(&rows)?;
            info!(table = %table.name, rows = rows.len(), "Copied table rows");
        }
    }

    tx.commit()?;
    info!(tables = created, copy_data, "Copied database schema");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn empty_store_is_rejected() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        assert!(matches!(
            Database::from_connection(conn, CatalogConfig::default()),
            Err(DbError::EmptyDatabase)
        ));
    }

    #[test]
    fn connection_strings_follow_sqlalchemy_form() {
        assert!(matches!(parse_connection_string("sqlite://"), Ok(Target::Memory)));
        assert!(matches!(
            parse_connection_string("sqlite:///:memory:"),
            Ok(Target::Memory)
        ));
        assert!(matches!(
            parse_connection_string("sqlite:///astrodb.db"),
            Ok(Target::File("astrodb.db"))
        ));
        assert!(matches!(
            parse_connection_string("sqlite:////tmp/astrodb.db"),
            Ok(Target::File("/tmp/astrodb.db"))
        ));
        assert!(matches!(
            parse_connection_string("data/astrodb.db"),
            Ok(Target::File("data/astrodb.db"))
        ));
        assert!(matches!(
            parse_connection_string("postgresql://localhost/astro"),
            Err(DbError::UnsupportedDialect(scheme)) if scheme == "postgresql"
        ));
    }

    #[test]
    fn table_handles_read_typed_rows() {
        let db = fixtures::example_database();
        let sources = db.table("Sources").expect("sources");
        assert_eq!(sources.count().expect("count"), 1);

        let rows = sources
            .rows_where("source", &SqlValue::from(fixtures::SOURCE))
            .expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("ra"), Some(&SqlValue::Real(209.301675)));
        assert_eq!(rows[0].get("shortname"), Some(&SqlValue::from("1357+1428")));

        assert!(matches!(
            db.table("Spectra"),
            Err(DbError::TableNotFound(name)) if name == "Spectra"
        ));
        assert!(matches!(
            sources.rows_where("name", &SqlValue::Null),
            Err(DbError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn insert_rejects_unknown_columns_before_writing() {
        let db = fixtures::example_database();
        let telescopes = db.table("Telescopes").expect("telescopes");
        let rows = vec![
            Row::new().with("name", "2MASS"),
            Row::new().with("name", "Gaia").with("aperture", 1.45),
        ];
        assert!(matches!(
            telescopes.insert(&rows),
            Err(DbError::ColumnNotFound { column, .. }) if column == "aperture"
        ));
        assert_eq!(telescopes.count().expect("count"), 1);
    }

    #[test]
    fn insert_coerces_to_declared_types() {
        let db = fixtures::example_database();
        let photometry = db.table("Photometry").expect("photometry");
        photometry
            .insert(&[Row::new()
                .with("source", fixtures::SOURCE)
                .with("band", "2MASS_J")
                .with("magnitude", "15.2")
                .with("reference", "Schm10")])
            .expect("insert");
        let rows = photometry
            .rows_where("band", &SqlValue::from("2MASS_J"))
            .expect("rows");
        assert_eq!(rows[0].get("magnitude"), Some(&SqlValue::Real(15.2)));
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let db = fixtures::example_database();
        let names = db.table("Names").expect("names");
        let result = names.insert(&[Row::new().with("source", "Nope").with("other_name", "x")]);
        assert!(matches!(result, Err(DbError::Sqlite(_))));
    }

    #[test]
    fn raw_queries_choose_their_output() {
        let db = fixtures::example_database();
        let result = db
            .sql_query(
                "SELECT band, magnitude FROM Photometry ORDER BY band",
                OutputFormat::parse("dataframe"),
            )
            .expect("query");
        match result {
            QueryResult::DataFrame(frame) => {
                assert_eq!(frame.len(), 2);
                assert_eq!(frame.column_names(), ["band", "magnitude"]);
            }
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[test]
    fn stores_with_unlinked_tables_still_open() {
        let db = fixtures::unlinked_database();
        assert_eq!(db.classifier().unlinked_tables(), ["Regimes"]);
        assert_eq!(db.table("Regimes").expect("regimes").count().expect("count"), 1);
        let result = db
            .sql_query("SELECT regime FROM Regimes", OutputFormat::Rows)
            .expect("query");
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn copy_replays_schema_and_rows() {
        let db = fixtures::example_database();
        let mut dest = Connection::open_in_memory().expect("dest");
        let created = copy_into(db.connection(), db.schema(), &mut dest, true).expect("copy");
        assert_eq!(created, 7);

        let copy = Database::from_connection(dest, CatalogConfig::default()).expect("copy db");
        for table in ["Publications", "Sources", "Photometry", "Names"] {
            assert_eq!(
                copy.table(table).expect(table).rows().expect("rows"),
                db.table(table).expect(table).rows().expect("rows"),
                "{table}"
            );
        }
    }
}
