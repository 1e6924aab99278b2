//! Workload fixture: tables and the changes written to them.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use table_index_core::model::{ColumnId, ColumnModel, TableId};
use table_index_core::truth::{InMemoryTruthStore, RowUpdate};
use table_index_runtime::TableChangePublisher;

/// Tables to create and change, in order.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub tables: Vec<TableWorkload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableWorkload {
    pub table_id: TableId,
    pub columns: Vec<ColumnModel>,
    #[serde(default)]
    pub changes: Vec<ChangeWorkload>,
    /// Schema that replaces `columns` once the changes are written
    #[serde(default)]
    pub final_columns: Option<Vec<ColumnModel>>,
    /// Delete the table after its changes
    #[serde(default)]
    pub delete: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeWorkload {
    pub headers: Vec<ColumnId>,
    pub rows: Vec<RowUpdate>,
}

impl Workload {
    /// Reads a workload from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data =
            std::fs::read(path).with_context(|| format!("read workload {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("parse workload {}", path.display()))
    }

    /// Ids of every table named by the workload.
    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.iter().map(|t| t.table_id.clone()).collect()
    }

    /// Writes every change through the publisher. Returns the number of changes published.
    ///
    /// Tables `truth` already holds, e.g. after a snapshot restore, are only
    /// touched so their indexes are revalidated.
    pub fn publish(
        &self,
        publisher: &TableChangePublisher,
        truth: &InMemoryTruthStore,
    ) -> anyhow::Result<usize> {
        let mut published = 0;
        for table in &self.tables {
            if truth.contains_table(&table.table_id)? {
                publisher
                    .touch(&table.table_id)
                    .with_context(|| format!("touch table {}", table.table_id))?;
                published += 1;
                continue;
            }

            publisher
                .set_schema(&table.table_id, table.columns.clone())
                .with_context(|| format!("create table {}", table.table_id))?;
            published += 1;

            for (n, change) in table.changes.iter().enumerate() {
                publisher
                    .append_rows(&table.table_id, change.headers.clone(), change.rows.clone())
                    .with_context(|| format!("change {} of table {}", n, table.table_id))?;
                published += 1;
            }

            if let Some(columns) = &table.final_columns {
                publisher
                    .set_schema(&table.table_id, columns.clone())
                    .with_context(|| format!("update schema of table {}", table.table_id))?;
                published += 1;
            }

            if table.delete {
                publisher
                    .delete_table(&table.table_id)
                    .with_context(|| format!("delete table {}", table.table_id))?;
                published += 1;
            }
        }
        Ok(published)
    }
}
