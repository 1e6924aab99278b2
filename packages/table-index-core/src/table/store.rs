//! Table index store: the queryable replica of each table.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use super::table::{IndexTable, IndexedRow};
use crate::error::{Result, SyncError};
use crate::model::{ColumnId, ColumnModel, RowSet, TableId};

/// Index store contract.
///
/// Mutations for a table are expected to run while holding that table's
/// exclusive lock.
pub trait TableIndexStore: Send + Sync {
    /// Makes the physical schema match `schema` exactly. Returns true if anything changed.
    fn create_or_update_table(&self, schema: &[ColumnModel], table_id: &TableId) -> Result<bool>;

    /// Drops the table. Returns true if it existed.
    fn delete_table(&self, table_id: &TableId) -> Result<bool>;

    /// Drops the table's bookkeeping (complete-version marker). No-op if absent.
    fn delete_status_table(&self, table_id: &TableId) -> Result<()>;

    /// Column ids of the physical table, or None if the table does not exist.
    fn get_current_table_columns(&self, table_id: &TableId) -> Result<Option<Vec<ColumnId>>>;

    /// Applies a batch of row versions atomically.
    ///
    /// Cells for headers outside `current_schema` are ignored; schema columns
    /// missing from the headers take their default. Deleted rows are removed.
    fn create_or_update_or_delete_rows(
        &self,
        row_set: &RowSet,
        current_schema: &[ColumnModel],
    ) -> Result<()>;

    /// Highest truth version fully reflected in the index.
    fn get_max_current_complete_version_for_table(&self, table_id: &TableId)
        -> Result<Option<u64>>;

    /// Records the highest fully reflected version. Lower values are rejected.
    fn set_max_current_complete_version_for_table(
        &self,
        table_id: &TableId,
        version: u64,
    ) -> Result<()>;

    /// Row count, or None if the table does not exist.
    fn get_row_count_for_table(&self, table_id: &TableId) -> Result<Option<usize>>;

    /// Reads a single row.
    fn get_row(&self, table_id: &TableId, row_id: u64) -> Result<Option<IndexedRow>>;

    /// Reads every row ordered by row id, or None if the table does not exist.
    fn rows(&self, table_id: &TableId) -> Result<Option<Vec<(u64, IndexedRow)>>>;
}

/// Serializable image of an [`InMemoryTableIndex`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Physical tables
    pub tables: Vec<IndexTable>,
    /// Complete-version markers by table
    pub complete_versions: BTreeMap<TableId, u64>,
}

/// In-process index store.
///
/// Each table is published through an `ArcSwap`: writers stage and validate
/// a batch against a clone, then swap it in, so readers only ever see whole
/// batches.
#[derive(Debug, Default)]
pub struct InMemoryTableIndex {
    /// Map of table id to its current image
    tables: RwLock<HashMap<TableId, Arc<ArcSwap<IndexTable>>>>,
    /// Complete-version markers ("status tables")
    complete_versions: RwLock<HashMap<TableId, u64>>,
}

impl InMemoryTableIndex {
    /// Creates an empty index store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a store from a snapshot.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        let tables = snapshot
            .tables
            .into_iter()
            .map(|table| (table.table_id.clone(), Arc::new(ArcSwap::from_pointee(table))))
            .collect();
        Self {
            tables: RwLock::new(tables),
            complete_versions: RwLock::new(snapshot.complete_versions.into_iter().collect()),
        }
    }

    /// Copies the whole store into a snapshot.
    pub fn snapshot(&self) -> Result<IndexSnapshot> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        let mut images: Vec<IndexTable> =
            tables.values().map(|slot| (**slot.load()).clone()).collect();
        images.sort_by(|a, b| a.table_id.cmp(&b.table_id));

        let versions = self
            .complete_versions
            .read()
            .map_err(|_| SyncError::LockPoisoned)?;
        Ok(IndexSnapshot {
            tables: images,
            complete_versions: versions.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        })
    }

    /// Current image of a table.
    pub fn table(&self, table_id: &TableId) -> Result<Option<Arc<IndexTable>>> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        Ok(tables.get(table_id).map(|slot| slot.load_full()))
    }

    /// Ids of every table in the store.
    pub fn table_ids(&self) -> Result<Vec<TableId>> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        let mut ids: Vec<TableId> = tables.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn slot(&self, table_id: &TableId) -> Result<Arc<ArcSwap<IndexTable>>> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        tables
            .get(table_id)
            .cloned()
            .ok_or_else(|| SyncError::TableNotFound {
                table: table_id.clone(),
            })
    }

    /// Replaces the table image with `build(current)` unless another writer got there first.
    fn swap_table<F>(slot: &ArcSwap<IndexTable>, build: F) -> Result<()>
    where
        F: Fn(&IndexTable) -> Result<IndexTable>,
    {
        loop {
            let current = slot.load_full();
            let next = Arc::new(build(&current)?);
            let previous = slot.compare_and_swap(&current, next);
            if Arc::ptr_eq(&previous, &current) {
                return Ok(());
            }
        }
    }
}

impl TableIndexStore for InMemoryTableIndex {
    fn create_or_update_table(&self, schema: &[ColumnModel], table_id: &TableId) -> Result<bool> {
        let mut tables = self.tables.write().map_err(|_| SyncError::LockPoisoned)?;
        match tables.get(table_id) {
            None => {
                let table = IndexTable::create(table_id.clone(), schema.to_vec())?;
                tables.insert(table_id.clone(), Arc::new(ArcSwap::from_pointee(table)));
                tracing::debug!(table = %table_id, columns = schema.len(), "Created index table");
                Ok(true)
            }
            Some(slot) => {
                if slot.load().columns == schema {
                    return Ok(false);
                }
                Self::swap_table(slot, |current| current.with_schema(schema))?;
                tracing::debug!(table = %table_id, columns = schema.len(), "Replaced index schema");
                Ok(true)
            }
        }
    }

    fn delete_table(&self, table_id: &TableId) -> Result<bool> {
        let mut tables = self.tables.write().map_err(|_| SyncError::LockPoisoned)?;
        Ok(tables.remove(table_id).is_some())
    }

    fn delete_status_table(&self, table_id: &TableId) -> Result<()> {
        let mut versions = self
            .complete_versions
            .write()
            .map_err(|_| SyncError::LockPoisoned)?;
        versions.remove(table_id);
        Ok(())
    }

    fn get_current_table_columns(&self, table_id: &TableId) -> Result<Option<Vec<ColumnId>>> {
        Ok(self.table(table_id)?.map(|table| table.column_ids()))
    }

    fn create_or_update_or_delete_rows(
        &self,
        row_set: &RowSet,
        current_schema: &[ColumnModel],
    ) -> Result<()> {
        let slot = self.slot(&row_set.table_id)?;
        Self::swap_table(&slot, |current| {
            let staged = current.stage_rows(row_set, current_schema)?;
            let mut next = current.clone();
            next.apply_staged(staged);
            Ok(next)
        })
    }

    fn get_max_current_complete_version_for_table(
        &self,
        table_id: &TableId,
    ) -> Result<Option<u64>> {
        let versions = self
            .complete_versions
            .read()
            .map_err(|_| SyncError::LockPoisoned)?;
        Ok(versions.get(table_id).copied())
    }

    fn set_max_current_complete_version_for_table(
        &self,
        table_id: &TableId,
        version: u64,
    ) -> Result<()> {
        let mut versions = self
            .complete_versions
            .write()
            .map_err(|_| SyncError::LockPoisoned)?;
        if let Some(&current) = versions.get(table_id) {
            if version < current {
                return Err(SyncError::ConflictingUpdate(format!(
                    "complete version of table '{}' cannot move back from {} to {}",
                    table_id, current, version
                )));
            }
        }
        versions.insert(table_id.clone(), version);
        Ok(())
    }

    fn get_row_count_for_table(&self, table_id: &TableId) -> Result<Option<usize>> {
        Ok(self.table(table_id)?.map(|table| table.row_count()))
    }

    fn get_row(&self, table_id: &TableId, row_id: u64) -> Result<Option<IndexedRow>> {
        Ok(self
            .table(table_id)?
            .and_then(|table| table.rows.get(&row_id).cloned()))
    }

    fn rows(&self, table_id: &TableId) -> Result<Option<Vec<(u64, IndexedRow)>>> {
        Ok(self.table(table_id)?.map(|table| {
            table
                .rows
                .iter()
                .map(|(&row_id, row)| (row_id, row.clone()))
                .collect()
        }))
    }
}
