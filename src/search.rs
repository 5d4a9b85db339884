//! Name search and free-text search over the catalog.

use rusqlite::types::ToSql;
use tracing::debug;

use crate::{
    config::SearchColumn,
    database::{quote_ident, Database},
    error::Result,
    names::{resolve_names, NameResolver},
    output::{OutputFormat, QueryResult},
    schema::TypeAffinity,
    value::SqlValue,
};

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Table whose rows are returned; the primary table when unset.
    pub output_table: Option<String>,
    /// Columns matched against the name; the configured search columns when unset.
    pub columns: Option<Vec<SearchColumn>>,
    /// Case-insensitive substring match; otherwise case-insensitive equality.
    pub fuzzy: bool,
    pub resolve_aliases: bool,
    pub format: OutputFormat,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            output_table: None,
            columns: None,
            fuzzy: true,
            resolve_aliases: false,
            format: OutputFormat::Rows,
        }
    }
}

impl Database {
    /// Rows of the output table for every entity whose search columns match
    /// `name`. Tables and columns are checked before any query runs.
    pub fn search_object(
        &self,
        name: &str,
        options: &SearchOptions,
        resolver: Option<&dyn NameResolver>,
    ) -> Result<QueryResult> {
        let output_name = options
            .output_table
            .as_deref()
            .unwrap_or(self.classifier.primary_table());
        let output = self.table(output_name)?;
        let output_key = self.classifier.entity_column(output_name)?;

        let columns = options
            .columns
            .as_deref()
            .unwrap_or(&self.classifier.config().search_columns);
        let mut targets = Vec::with_capacity(columns.len());
        for target in columns {
            let handle = self.table(&target.table)?;
            handle.schema().require_column(&target.column)?;
            let key = self.classifier.entity_column(&target.table)?;
            targets.push((handle, target.column.as_str(), key));
        }

        let names = match resolver {
            Some(resolver) if options.resolve_aliases => resolve_names(name, resolver),
            _ => vec![name.to_string()],
        };
        let patterns: Vec<SqlValue> = names
            .iter()
            .map(|n| match_pattern(n, options.fuzzy))
            .collect();

        // One subquery per target; every subquery reuses the same pattern
        // parameters, so the bound count depends only on the alias count.
        let rows = if targets.is_empty() {
            Vec::new()
        } else {
            let subqueries: Vec<String> = targets
                .iter()
                .map(|(handle, column, key_column)| {
                    format!(
                        "{} IN (SELECT {} FROM {} WHERE {})",
                        quote_ident(output_key),
                        quote_ident(key_column),
                        quote_ident(handle.name()),
                        match_filter(&[*column], patterns.len(), options.fuzzy)
                    )
                })
                .collect();
            let params: Vec<&dyn ToSql> = patterns.iter().map(|p| p as &dyn ToSql).collect();
            output.select(Some(&subqueries.join(" OR ")), &params)?
        };
        debug!(name = %name, aliases = names.len(), rows = rows.len(), "Searched object");

        Ok(QueryResult::build(
            options.format,
            output.schema().column_names(),
            rows,
        ))
    }

    /// Matches `value` against every text column of every table. Tables
    /// without a match are left out.
    pub fn search_string(
        &self,
        value: &str,
        fuzzy: bool,
        format: OutputFormat,
    ) -> Result<Vec<(String, QueryResult)>> {
        let pattern = match_pattern(value, fuzzy);
        let mut results = Vec::new();
        for table in self.schema.tables() {
            let text_columns: Vec<&str> = table
                .columns
                .iter()
                .filter(|c| c.affinity == TypeAffinity::Text)
                .map(|c| c.name.as_str())
                .collect();
            if text_columns.is_empty() {
                continue;
            }
            let filter = match_filter(&text_columns, 1, fuzzy);
            let rows = self.table(&table.name)?.select(Some(&filter), &[&pattern as &dyn ToSql])?;
            if !rows.is_empty() {
                debug!(table = %table.name, rows = rows.len(), "String search matched");
                results.push((
                    table.name.clone(),
                    QueryResult::build(format, table.column_names(), rows),
                ));
            }
        }
        Ok(results)
    }
}

fn match_pattern(value: &str, fuzzy: bool) -> SqlValue {
    if fuzzy {
        SqlValue::Text(format!("%{}%", escape_like(&value.to_ascii_lowercase())))
    } else {
        SqlValue::Text(value.to_ascii_lowercase())
    }
}

/// `(LOWER(a) LIKE ?1 OR LOWER(b) LIKE ?1 OR ...)` over every column and parameter.
fn match_filter(columns: &[&str], params: usize, fuzzy: bool) -> String {
    let mut clauses = Vec::with_capacity(columns.len() * params);
    for column in columns {
        for i in 1..=params {
            let clause = if fuzzy {
                format!("LOWER({}) LIKE ?{i} ESCAPE '\\'", quote_ident(column))
            } else {
                format!("LOWER({}) = ?{i}", quote_ident(column))
            };
            clauses.push(clause);
        }
    }
    format!("({})", clauses.join(" OR "))
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::{error::DbError, fixtures, names::StaticResolver, value::Row};

    use super::*;

    #[test]
    fn fuzzy_search_matches_names_case_insensitively() {
        let db = fixtures::example_database();
        let result = db
            .search_object("sdss j1357", &SearchOptions::default(), None)
            .expect("search");
        let rows = result.into_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("source"), Some(&SqlValue::from(fixtures::SOURCE)));
    }

    #[test]
    fn exact_search_needs_the_whole_name() {
        let db = fixtures::example_database();
        let exact = SearchOptions {
            fuzzy: false,
            ..SearchOptions::default()
        };
        assert!(db.search_object("1357", &exact, None).expect("partial").is_empty());
        assert_eq!(
            db.search_object("1357+1428", &exact, None).expect("shortname").len(),
            1
        );
    }

    #[test]
    fn output_table_returns_dependent_rows() {
        let db = fixtures::example_database();
        let options = SearchOptions {
            output_table: Some("Photometry".to_string()),
            format: OutputFormat::Table,
            ..SearchOptions::default()
        };
        let result = db.search_object("1357", &options, None).expect("search");
        assert!(matches!(&result, QueryResult::Table(table) if table.len() == 2));
    }

    #[test]
    fn aliases_expand_the_query() {
        let db = fixtures::example_database();
        let resolver = StaticResolver::new().with("LP 499-3", ["V* SDSS J135712.40+142839.8"]);
        let options = SearchOptions {
            fuzzy: false,
            resolve_aliases: true,
            ..SearchOptions::default()
        };
        assert_eq!(
            db.search_object("LP 499-3", &options, Some(&resolver))
                .expect("search")
                .len(),
            1
        );
        assert!(db
            .search_object("LP 499-3", &options, None)
            .expect("no resolver")
            .is_empty());
    }

    #[test]
    fn unknown_search_targets_fail_first() {
        let db = fixtures::example_database();
        let bad_table = SearchOptions {
            columns: Some(vec![SearchColumn::new("Aliases", "name")]),
            ..SearchOptions::default()
        };
        assert!(matches!(
            db.search_object("x", &bad_table, None),
            Err(DbError::TableNotFound(name)) if name == "Aliases"
        ));

        let bad_column = SearchOptions {
            columns: Some(vec![SearchColumn::new("Sources", "designation")]),
            ..SearchOptions::default()
        };
        assert!(matches!(
            db.search_object("x", &bad_column, None),
            Err(DbError::ColumnNotFound { column, .. }) if column == "designation"
        ));

        let bad_output = SearchOptions {
            output_table: Some("Spectra".to_string()),
            ..SearchOptions::default()
        };
        assert!(db
            .search_object("x", &bad_output, None)
            .is_err_and(|e| e.is_configuration()));
    }

    #[test]
    fn string_search_spans_tables() {
        let db = fixtures::example_database();
        let results = db
            .search_string("wise", true, OutputFormat::Rows)
            .expect("search");
        let tables: Vec<&str> = results.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tables, ["Photometry", "Publications", "Telescopes"]);
    }

    #[test]
    fn like_wildcards_are_literal() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
        let db = fixtures::example_database();
        assert!(db
            .search_string("wise_w", true, OutputFormat::Rows)
            .expect("search")
            .iter()
            .all(|(table, _)| table == "Photometry"));
    }

    #[test]
    fn broad_matches_are_not_limited_by_bound_parameters() {
        let db = fixtures::empty_database();
        db.table("Publications")
            .expect("publications")
            .insert(&[Row::new().with("name", "Cutr12")])
            .expect("publication");
        let sources: Vec<Row> = (0..33_000)
            .map(|i| {
                Row::new()
                    .with("source", format!("2MASS J{i:05}"))
                    .with("reference", "Cutr12")
            })
            .collect();
        db.table("Sources")
            .expect("sources")
            .insert(&sources)
            .expect("sources");

        let result = db
            .search_object("2mass", &SearchOptions::default(), None)
            .expect("search");
        assert_eq!(result.len(), 33_000);
    }
}
