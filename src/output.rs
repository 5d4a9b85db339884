//! Result containers for queries: plain rows, a row-major table, or a
//! column-major data frame. Each is a pure conversion from row records.

use std::fmt;

use serde::Serialize;

use crate::{
    error::{DbError, Result},
    value::{Row, SqlValue},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Rows,
    Table,
    DataFrame,
}

impl OutputFormat {
    /// Unknown names fall back to plain rows.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "table" | "astropy" => Self::Table,
            "dataframe" | "pandas" => Self::DataFrame,
            _ => Self::Rows,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rows => "rows",
            Self::Table => "table",
            Self::DataFrame => "dataframe",
        }
    }
}

/// Row-major table with a fixed column list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tabular {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl Tabular {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: &[Row]) -> Self {
        let rows = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn push(&mut self, values: Vec<SqlValue>) {
        self.rows.push(values);
    }

    /// Every row must hold one value per column.
    pub fn check_shape(&self) -> Result<()> {
        match self
            .rows
            .iter()
            .position(|values| values.len() != self.columns.len())
        {
            Some(i) => Err(DbError::RaggedData {
                input: "table",
                label: format!("row {i}"),
                expected: self.columns.len(),
                found: self.rows[i].len(),
            }),
            None => Ok(()),
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| columns.iter().cloned().zip(values).collect())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for Tabular {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                cells
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.chars().count())
                    .chain(std::iter::once(column.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        write_line(f, self.columns.iter().map(String::as_str), &widths)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write_line(f, rule.iter().map(String::as_str), &widths)?;
        for row in &cells {
            write_line(f, row.iter().map(String::as_str), &widths)?;
        }
        Ok(())
    }
}

fn write_line<'a>(
    f: &mut fmt::Formatter<'_>,
    cells: impl Iterator<Item = &'a str>,
    widths: &[usize],
) -> fmt::Result {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect();
    writeln!(f, "{}", line.join("  ").trim_end())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<SqlValue>,
}

/// Column-major frame; every series has the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataFrame {
    pub columns: Vec<Series>,
}

impl DataFrame {
    pub fn from_rows(columns: Vec<String>, rows: &[Row]) -> Self {
        let columns = columns
            .into_iter()
            .map(|name| {
                let values = rows
                    .iter()
                    .map(|row| row.get(&name).cloned().unwrap_or(SqlValue::Null))
                    .collect();
                Series { name, values }
            })
            .collect();
        Self { columns }
    }

    pub fn column(&self, name: &str) -> Option<&Series> {
        self.columns.iter().find(|s| s.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.first().map(|s| s.values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every series must match the length of the first.
    pub fn check_shape(&self) -> Result<()> {
        let expected = self.len();
        match self.columns.iter().find(|s| s.values.len() != expected) {
            Some(series) => Err(DbError::RaggedData {
                input: "data frame",
                label: series.name.clone(),
                expected,
                found: series.values.len(),
            }),
            None => Ok(()),
        }
    }

    pub fn to_tabular(&self) -> Tabular {
        let mut table = Tabular::new(self.column_names());
        for i in 0..self.len() {
            table.push(
                self.columns
                    .iter()
                    .map(|s| s.values.get(i).cloned().unwrap_or(SqlValue::Null))
                    .collect(),
            );
        }
        table
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.to_tabular().into_rows()
    }
}

impl fmt::Display for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_tabular(), f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows(Vec<Row>),
    Table(Tabular),
    DataFrame(DataFrame),
}

impl QueryResult {
    pub fn build(format: OutputFormat, columns: Vec<String>, rows: Vec<Row>) -> Self {
        match format {
            OutputFormat::Rows => Self::Rows(rows),
            OutputFormat::Table => Self::Table(Tabular::from_rows(columns, &rows)),
            OutputFormat::DataFrame => Self::DataFrame(DataFrame::from_rows(columns, &rows)),
        }
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            Self::Rows(_) => OutputFormat::Rows,
            Self::Table(_) => OutputFormat::Table,
            Self::DataFrame(_) => OutputFormat::DataFrame,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Rows(rows) => rows.len(),
            Self::Table(table) => table.len(),
            Self::DataFrame(frame) => frame.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            Self::Table(table) => table.into_rows(),
            Self::DataFrame(frame) => frame.into_rows(),
        }
    }
}
