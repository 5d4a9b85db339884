use tracing::debug;

use crate::{
    database::Database,
    document::Document,
    error::Result,
    value::SqlValue,
};

impl Database {
    /// Every row describing one entity: its primary-table row in full, then
    /// each data table with matching rows, foreign key stripped. Tables with
    /// no matches are left out.
    pub fn inventory(&self, entity: impl Into<SqlValue>) -> Result<Document> {
        let entity = entity.into();
        let classifier = &self.classifier;
        classifier.require_foreign_keys()?;
        let mut document = Document::new();

        let primary = self
            .table(classifier.primary_table())?
            .rows_where(classifier.primary_key(), &entity)?;
        if !primary.is_empty() {
            document.insert(classifier.primary_table(), primary);
        }

        for table in classifier.data_tables() {
            let mut rows = self
                .table(table)?
                .rows_where(classifier.foreign_key(), &entity)?;
            if rows.is_empty() {
                continue;
            }
            for row in &mut rows {
                row.remove(classifier.foreign_key());
            }
            document.insert(table.as_str(), rows);
        }

        debug!(entity = %entity, tables = document.len(), "Built inventory");
        Ok(document)
    }
}
