//! Row truth store: the append-only, versioned source the index is rebuilt from.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::model::{ColumnId, ColumnModel, Row, RowSet, TableId, TableRowChange};

/// Read side of the truth store consumed by the synchronization worker.
pub trait RowTruthStore: Send + Sync {
    /// Current schema of the table. Empty when every column was removed.
    fn get_column_models_for_table(&self, table_id: &TableId) -> Result<Vec<ColumnModel>>;

    /// Latest change appended to the table, or None if nothing was ever written.
    fn get_last_table_row_change(&self, table_id: &TableId) -> Result<Option<TableRowChange>>;

    /// Change recorded at `version`, or None if the table never reached it.
    fn get_table_row_change(&self, table_id: &TableId, version: u64)
        -> Result<Option<TableRowChange>>;

    /// Highest row id ever assigned, or None if the table has no rows.
    fn get_max_row_id(&self, table_id: &TableId) -> Result<Option<u64>>;

    /// Current version of each row with `offset <= row_id < offset + limit`.
    ///
    /// Rows whose current version is not strictly above `floor_exclusive`
    /// are left out. Deleted rows are reported at the version that deleted them.
    fn get_current_row_versions(
        &self,
        table_id: &TableId,
        floor_exclusive: Option<u64>,
        offset: u64,
        limit: u64,
    ) -> Result<BTreeMap<u64, u64>>;

    /// Rows as written by change `version`.
    ///
    /// Fails with `RowNotFound` if a requested row was not touched by that change.
    fn get_row_set(
        &self,
        table_id: &TableId,
        version: u64,
        row_ids: &BTreeSet<u64>,
    ) -> Result<RowSet>;
}

/// One row of a change written to the truth store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowUpdate {
    /// Existing row id, or None to allocate a new row
    #[serde(default)]
    pub row_id: Option<u64>,
    /// Cells aligned with the change headers; None deletes the row
    #[serde(default)]
    pub values: Option<Vec<Option<String>>>,
}

impl RowUpdate {
    /// Adds a new row.
    pub fn insert(values: Vec<Option<String>>) -> Self {
        Self {
            row_id: None,
            values: Some(values),
        }
    }

    /// Overwrites an existing row.
    pub fn update(row_id: u64, values: Vec<Option<String>>) -> Self {
        Self {
            row_id: Some(row_id),
            values: Some(values),
        }
    }

    /// Deletes an existing row.
    pub fn delete(row_id: u64) -> Self {
        Self {
            row_id: Some(row_id),
            values: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TruthTable {
    schema: Vec<ColumnModel>,
    /// Changes in version order; a change's version is its position
    changes: Vec<TableRowChange>,
    /// Row id -> version -> values written at that version
    rows: BTreeMap<u64, BTreeMap<u64, Option<Vec<Option<String>>>>>,
    next_row_id: u64,
}

impl TruthTable {
    fn current_version(&self, row_id: u64) -> Option<u64> {
        self.rows
            .get(&row_id)
            .and_then(|versions| versions.keys().next_back().copied())
    }
}

/// Serializable image of an [`InMemoryTruthStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TruthSnapshot {
    tables: BTreeMap<TableId, TruthTable>,
}

impl TruthSnapshot {
    /// Number of tables in the image.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

/// In-process truth store.
#[derive(Debug, Default)]
pub struct InMemoryTruthStore {
    tables: RwLock<HashMap<TableId, TruthTable>>,
}

impl InMemoryTruthStore {
    /// Creates an empty truth store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a store from a snapshot.
    pub fn from_snapshot(snapshot: TruthSnapshot) -> Self {
        Self {
            tables: RwLock::new(snapshot.tables.into_iter().collect()),
        }
    }

    /// Copies every table and its history into a snapshot.
    pub fn snapshot(&self) -> Result<TruthSnapshot> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        Ok(TruthSnapshot {
            tables: tables
                .iter()
                .map(|(id, table)| (id.clone(), table.clone()))
                .collect(),
        })
    }

    /// Returns true if the table exists.
    pub fn contains_table(&self, table_id: &TableId) -> Result<bool> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        Ok(tables.contains_key(table_id))
    }

    /// Creates the table if needed and replaces its schema.
    pub fn set_schema(&self, table_id: &TableId, schema: Vec<ColumnModel>) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| SyncError::LockPoisoned)?;
        tables.entry(table_id.clone()).or_default().schema = schema;
        Ok(())
    }

    /// Appends a change, allocating row ids for new rows.
    ///
    /// Every header must be a column of the current schema and every row must
    /// carry one value per header. Nothing is written if any row is invalid.
    pub fn append_row_set(
        &self,
        table_id: &TableId,
        headers: Vec<ColumnId>,
        updates: Vec<RowUpdate>,
    ) -> Result<TableRowChange> {
        let mut tables = self.tables.write().map_err(|_| SyncError::LockPoisoned)?;
        let table = tables
            .get_mut(table_id)
            .ok_or_else(|| SyncError::TableNotFound {
                table: table_id.clone(),
            })?;

        let invalid = |reason: String| SyncError::InvalidRowSet {
            table: table_id.clone(),
            reason,
        };

        if let Some(unknown) = headers
            .iter()
            .find(|id| !table.schema.iter().any(|c| c.id == **id))
        {
            return Err(invalid(format!("column {} is not in the schema", unknown)));
        }

        let version = table.changes.len() as u64;
        let mut next_row_id = table.next_row_id;
        let mut staged = Vec::with_capacity(updates.len());
        for update in updates {
            if let Some(values) = &update.values {
                if values.len() != headers.len() {
                    return Err(invalid(format!(
                        "{} values for {} headers",
                        values.len(),
                        headers.len()
                    )));
                }
            }
            let row_id = match update.row_id {
                Some(row_id) if table.rows.contains_key(&row_id) => row_id,
                Some(row_id) => {
                    return Err(SyncError::RowNotFound {
                        table: table_id.clone(),
                        row_id,
                        version,
                    })
                }
                None if update.values.is_none() => {
                    return Err(invalid("cannot delete a row without an id".to_string()))
                }
                None => {
                    let row_id = next_row_id;
                    next_row_id += 1;
                    row_id
                }
            };
            staged.push((row_id, update.values));
        }

        let change = TableRowChange {
            table_id: table_id.clone(),
            version,
            etag: uuid::Uuid::new_v4().to_string(),
            headers,
            row_count: staged.len(),
        };
        for (row_id, values) in staged {
            table.rows.entry(row_id).or_default().insert(version, values);
        }
        table.next_row_id = next_row_id;
        table.changes.push(change.clone());

        tracing::debug!(
            table = %table_id,
            version,
            rows = change.row_count,
            "Appended row change"
        );
        Ok(change)
    }

    /// Removes the table and its history. Returns true if it existed.
    pub fn delete_table(&self, table_id: &TableId) -> Result<bool> {
        let mut tables = self.tables.write().map_err(|_| SyncError::LockPoisoned)?;
        Ok(tables.remove(table_id).is_some())
    }

    /// Current values of every live row, keyed by row id then column id.
    ///
    /// Only columns of the current schema are reported; columns the row's
    /// change did not write are left out.
    pub fn current_values(
        &self,
        table_id: &TableId,
    ) -> Result<BTreeMap<u64, BTreeMap<ColumnId, Option<String>>>> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        let table = lookup(&tables, table_id)?;

        let mut current = BTreeMap::new();
        for (&row_id, versions) in &table.rows {
            let Some((&version, Some(values))) = versions.iter().next_back() else {
                continue;
            };
            let Some(change) = table.changes.get(version as usize) else {
                continue;
            };
            let cells = change
                .headers
                .iter()
                .zip(values)
                .filter(|(id, _)| table.schema.iter().any(|c| c.id == **id))
                .map(|(&id, value)| (id, value.clone()))
                .collect();
            current.insert(row_id, cells);
        }
        Ok(current)
    }
}

fn lookup<'a>(
    tables: &'a HashMap<TableId, TruthTable>,
    table_id: &TableId,
) -> Result<&'a TruthTable> {
    tables.get(table_id).ok_or_else(|| SyncError::TableNotFound {
        table: table_id.clone(),
    })
}

impl RowTruthStore for InMemoryTruthStore {
    fn get_column_models_for_table(&self, table_id: &TableId) -> Result<Vec<ColumnModel>> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        Ok(lookup(&tables, table_id)?.schema.clone())
    }

    fn get_last_table_row_change(&self, table_id: &TableId) -> Result<Option<TableRowChange>> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        Ok(lookup(&tables, table_id)?.changes.last().cloned())
    }

    fn get_table_row_change(
        &self,
        table_id: &TableId,
        version: u64,
    ) -> Result<Option<TableRowChange>> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        Ok(lookup(&tables, table_id)?
            .changes
            .get(version as usize)
            .cloned())
    }

    fn get_max_row_id(&self, table_id: &TableId) -> Result<Option<u64>> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        Ok(lookup(&tables, table_id)?.rows.keys().next_back().copied())
    }

    fn get_current_row_versions(
        &self,
        table_id: &TableId,
        floor_exclusive: Option<u64>,
        offset: u64,
        limit: u64,
    ) -> Result<BTreeMap<u64, u64>> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        let table = lookup(&tables, table_id)?;

        let mut versions = BTreeMap::new();
        if limit == 0 {
            return Ok(versions);
        }
        let end = offset.saturating_add(limit);
        for &row_id in table.rows.range(offset..end).map(|(row_id, _)| row_id) {
            let Some(version) = table.current_version(row_id) else {
                continue;
            };
            if floor_exclusive.map_or(true, |floor| version > floor) {
                versions.insert(row_id, version);
            }
        }
        Ok(versions)
    }

    fn get_row_set(
        &self,
        table_id: &TableId,
        version: u64,
        row_ids: &BTreeSet<u64>,
    ) -> Result<RowSet> {
        let tables = self.tables.read().map_err(|_| SyncError::LockPoisoned)?;
        let table = lookup(&tables, table_id)?;
        let change = table
            .changes
            .get(version as usize)
            .ok_or_else(|| SyncError::RowNotFound {
                table: table_id.clone(),
                row_id: row_ids.iter().next().copied().unwrap_or_default(),
                version,
            })?;

        let mut rows = Vec::with_capacity(row_ids.len());
        for &row_id in row_ids {
            let values = table
                .rows
                .get(&row_id)
                .and_then(|versions| versions.get(&version))
                .ok_or_else(|| SyncError::RowNotFound {
                    table: table_id.clone(),
                    row_id,
                    version,
                })?;
            rows.push(Row {
                row_id,
                version_number: version,
                values: values.clone(),
            });
        }

        Ok(RowSet {
            table_id: table_id.clone(),
            etag: Some(change.etag.clone()),
            headers: change.headers.clone(),
            rows,
        })
    }
}
