//! Physical index table: schema plus typed rows keyed by row id.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::cell::CellValue;
use super::validation;
use crate::error::{Result, SyncError};
use crate::model::{ColumnId, ColumnModel, RowSet, TableId};

/// A row as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRow {
    /// Truth version the row values were written at
    pub version_number: u64,
    /// Cells in table column order
    pub cells: Vec<CellValue>,
}

/// Validated row operation waiting to be applied.
#[derive(Debug)]
pub(crate) enum StagedRow {
    Upsert { row_id: u64, row: IndexedRow },
    Delete { row_id: u64 },
}

/// Index table: schema and rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexTable {
    /// Table identifier
    pub table_id: TableId,
    /// Columns in physical order
    pub columns: Vec<ColumnModel>,
    /// Rows keyed by row id
    pub rows: BTreeMap<u64, IndexedRow>,
}

impl IndexTable {
    /// Creates an empty table with the given schema.
    pub fn create(table_id: TableId, columns: Vec<ColumnModel>) -> Result<Self> {
        validation::validate_schema(&table_id, &columns)?;
        Ok(Self {
            table_id,
            columns,
            rows: BTreeMap::new(),
        })
    }

    /// Column ids in physical order.
    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.columns.iter().map(|c| c.id).collect()
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cell of `row_id` in column `column_id`.
    pub fn cell(&self, row_id: u64, column_id: ColumnId) -> Option<&CellValue> {
        let position = self.columns.iter().position(|c| c.id == column_id)?;
        self.rows.get(&row_id).and_then(|row| row.cells.get(position))
    }

    /// Returns a copy of this table rebuilt for `schema`.
    ///
    /// Columns absent from `schema` are dropped, retained columns keep their
    /// values (converted when the type changed) and new columns take their
    /// default.
    pub fn with_schema(&self, schema: &[ColumnModel]) -> Result<Self> {
        validation::validate_schema(&self.table_id, schema)?;

        let old_positions: HashMap<ColumnId, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();

        let mut defaults = Vec::with_capacity(schema.len());
        for column in schema {
            defaults.push(validation::default_cell(column)?);
        }

        let mut rows = BTreeMap::new();
        for (&row_id, row) in &self.rows {
            let mut cells = Vec::with_capacity(schema.len());
            for (column, default) in schema.iter().zip(&defaults) {
                let cell = match old_positions.get(&column.id) {
                    Some(&i) => match row.cells.get(i) {
                        Some(cell) if self.columns[i].column_type == column.column_type => {
                            cell.clone()
                        }
                        Some(cell) => validation::convert_cell(cell, column),
                        None => CellValue::Null,
                    },
                    None => default.clone(),
                };
                cells.push(cell);
            }
            rows.insert(
                row_id,
                IndexedRow {
                    version_number: row.version_number,
                    cells,
                },
            );
        }

        Ok(Self {
            table_id: self.table_id.clone(),
            columns: schema.to_vec(),
            rows,
        })
    }

    /// Validates every row of `row_set` without touching the table.
    ///
    /// Only columns in both the table and `current_schema` are read from the
    /// row set; every other table column takes its default.
    pub(crate) fn stage_rows(
        &self,
        row_set: &RowSet,
        current_schema: &[ColumnModel],
    ) -> Result<Vec<StagedRow>> {
        if row_set.table_id != self.table_id {
            return Err(SyncError::InvalidRowSet {
                table: self.table_id.clone(),
                reason: format!("row set belongs to table '{}'", row_set.table_id),
            });
        }

        let header_positions: HashMap<ColumnId, usize> = row_set
            .headers
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        // Source position in the row set for each table column, if it is mapped
        let mut sources = Vec::with_capacity(self.columns.len());
        let mut defaults = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let in_schema = current_schema.iter().any(|c| c.id == column.id);
            sources.push(if in_schema {
                header_positions.get(&column.id).copied()
            } else {
                None
            });
            defaults.push(validation::default_cell(column)?);
        }

        let mut staged = Vec::with_capacity(row_set.rows.len());
        for row in &row_set.rows {
            let Some(values) = &row.values else {
                staged.push(StagedRow::Delete { row_id: row.row_id });
                continue;
            };
            if values.len() != row_set.headers.len() {
                return Err(SyncError::InvalidRowSet {
                    table: self.table_id.clone(),
                    reason: format!(
                        "row {} has {} values for {} headers",
                        row.row_id,
                        values.len(),
                        row_set.headers.len()
                    ),
                });
            }

            let mut cells = Vec::with_capacity(self.columns.len());
            for ((column, source), default) in self.columns.iter().zip(&sources).zip(&defaults) {
                let cell = match source {
                    Some(i) => validation::parse_cell(column, values[*i].as_deref())?,
                    None => default.clone(),
                };
                cells.push(cell);
            }
            staged.push(StagedRow::Upsert {
                row_id: row.row_id,
                row: IndexedRow {
                    version_number: row.version_number,
                    cells,
                },
            });
        }
        Ok(staged)
    }

    /// Applies previously staged operations.
    pub(crate) fn apply_staged(&mut self, staged: Vec<StagedRow>) {
        for op in staged {
            match op {
                StagedRow::Upsert { row_id, row } => {
                    self.rows.insert(row_id, row);
                }
                StagedRow::Delete { row_id } => {
                    self.rows.remove(&row_id);
                }
            }
        }
    }
}
