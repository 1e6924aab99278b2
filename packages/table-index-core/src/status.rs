//! Table status register.
//!
//! One status record per table tracks the lifecycle of the table's index:
//!
//! ```text
//! Pending ──→ Processing ──→ Available
//!                  │    └──→ Failed
//!                  ↑
//!   reset_to_processing() from any state (new reset token)
//! ```
//!
//! Every mutation except creation and reset must present the reset token the
//! caller last observed. A mismatch fails with [`SyncError::StaleToken`] and
//! leaves the record untouched.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::message::now_millis;
use crate::model::{ResetToken, TableId};

/// Lifecycle state of a table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableState {
    Pending,
    Processing,
    Available,
    Failed,
}

/// Durable record of a table index's state and progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatus {
    pub table_id: TableId,
    pub state: TableState,
    pub reset_token: ResetToken,
    pub progress_message: Option<String>,
    pub progress_current: Option<u64>,
    pub progress_total: Option<u64>,
    pub last_error: Option<String>,
    pub last_error_detail: Option<String>,
    /// Etag of the last truth change reflected by an available index
    pub last_successful_etag: Option<String>,
    /// Milliseconds since the epoch when processing last started
    pub started_on: u64,
    /// Milliseconds since the epoch of the last mutation
    pub changed_on: u64,
}

impl TableStatus {
    fn pending(table_id: TableId) -> Self {
        let now = now_millis();
        Self {
            table_id,
            state: TableState::Pending,
            reset_token: ResetToken::generate(),
            progress_message: None,
            progress_current: None,
            progress_total: None,
            last_error: None,
            last_error_detail: None,
            last_successful_etag: None,
            started_on: now,
            changed_on: now,
        }
    }
}

/// Status register contract.
pub trait TableStatusRegister: Send + Sync {
    /// Returns the status, creating a pending record with a fresh token if absent.
    fn get_or_create(&self, table_id: &TableId) -> Result<TableStatus>;

    /// Returns the status if it exists.
    fn get(&self, table_id: &TableId) -> Result<Option<TableStatus>>;

    /// Issues a new reset token and moves the table to `Processing`.
    fn reset_to_processing(&self, table_id: &TableId) -> Result<ResetToken>;

    /// Records progress; moves the table to `Processing`.
    fn update_progress(
        &self,
        table_id: &TableId,
        reset_token: &ResetToken,
        message: &str,
        current: u64,
        total: u64,
    ) -> Result<()>;

    /// Moves the table to `Available`.
    fn mark_available(
        &self,
        table_id: &TableId,
        reset_token: &ResetToken,
        last_etag: Option<String>,
    ) -> Result<()>;

    /// Moves the table to `Failed` with diagnostics.
    fn mark_failed(
        &self,
        table_id: &TableId,
        reset_token: &ResetToken,
        error_message: &str,
        error_detail: &str,
    ) -> Result<()>;

    /// Removes the status record. No-op if absent.
    fn delete(&self, table_id: &TableId) -> Result<()>;
}

/// In-process status register.
#[derive(Debug, Default)]
pub struct InMemoryStatusRegister {
    statuses: RwLock<HashMap<TableId, TableStatus>>,
}

impl InMemoryStatusRegister {
    /// Creates an empty register.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a register from persisted records.
    pub fn from_records(records: Vec<TableStatus>) -> Self {
        let statuses = records
            .into_iter()
            .map(|status| (status.table_id.clone(), status))
            .collect();
        Self {
            statuses: RwLock::new(statuses),
        }
    }

    /// Copies every record, ordered by table id.
    pub fn records(&self) -> Result<Vec<TableStatus>> {
        let statuses = self.statuses.read().map_err(|_| SyncError::LockPoisoned)?;
        let mut records: Vec<TableStatus> = statuses.values().cloned().collect();
        records.sort_by(|a, b| a.table_id.cmp(&b.table_id));
        Ok(records)
    }

    /// Applies `update` to the record if `reset_token` is current.
    fn update_with_token<F>(&self, table_id: &TableId, reset_token: &ResetToken, update: F) -> Result<()>
    where
        F: FnOnce(&mut TableStatus),
    {
        let mut statuses = self.statuses.write().map_err(|_| SyncError::LockPoisoned)?;
        let status = statuses
            .get_mut(table_id)
            .ok_or_else(|| SyncError::TableNotFound {
                table: table_id.clone(),
            })?;
        if &status.reset_token != reset_token {
            return Err(SyncError::StaleToken {
                table: table_id.clone(),
                expected: reset_token.clone(),
                current: status.reset_token.clone(),
            });
        }
        update(status);
        status.changed_on = now_millis();
        Ok(())
    }
}

impl TableStatusRegister for InMemoryStatusRegister {
    fn get_or_create(&self, table_id: &TableId) -> Result<TableStatus> {
        if let Some(status) = self.get(table_id)? {
            return Ok(status);
        }
        let mut statuses = self.statuses.write().map_err(|_| SyncError::LockPoisoned)?;
        // Another caller may have created it between the read and the write
        let status = statuses
            .entry(table_id.clone())
            .or_insert_with(|| TableStatus::pending(table_id.clone()));
        Ok(status.clone())
    }

    fn get(&self, table_id: &TableId) -> Result<Option<TableStatus>> {
        let statuses = self.statuses.read().map_err(|_| SyncError::LockPoisoned)?;
        Ok(statuses.get(table_id).cloned())
    }

    fn reset_to_processing(&self, table_id: &TableId) -> Result<ResetToken> {
        let mut statuses = self.statuses.write().map_err(|_| SyncError::LockPoisoned)?;
        let status = statuses
            .entry(table_id.clone())
            .or_insert_with(|| TableStatus::pending(table_id.clone()));
        let now = now_millis();
        status.state = TableState::Processing;
        status.reset_token = ResetToken::generate();
        status.progress_message = None;
        status.progress_current = None;
        status.progress_total = None;
        status.last_error = None;
        status.last_error_detail = None;
        status.started_on = now;
        status.changed_on = now;
        Ok(status.reset_token.clone())
    }

    fn update_progress(
        &self,
        table_id: &TableId,
        reset_token: &ResetToken,
        message: &str,
        current: u64,
        total: u64,
    ) -> Result<()> {
        self.update_with_token(table_id, reset_token, |status| {
            status.state = TableState::Processing;
            status.progress_message = Some(message.to_string());
            status.progress_current = Some(current);
            status.progress_total = Some(total);
        })
    }

    fn mark_available(
        &self,
        table_id: &TableId,
        reset_token: &ResetToken,
        last_etag: Option<String>,
    ) -> Result<()> {
        self.update_with_token(table_id, reset_token, |status| {
            status.state = TableState::Available;
            status.last_successful_etag = last_etag;
            status.progress_message = None;
            status.last_error = None;
            status.last_error_detail = None;
        })
    }

    fn mark_failed(
        &self,
        table_id: &TableId,
        reset_token: &ResetToken,
        error_message: &str,
        error_detail: &str,
    ) -> Result<()> {
        self.update_with_token(table_id, reset_token, |status| {
            status.state = TableState::Failed;
            status.last_error = Some(error_message.to_string());
            status.last_error_detail = Some(error_detail.to_string());
        })
    }

    fn delete(&self, table_id: &TableId) -> Result<()> {
        let mut statuses = self.statuses.write().map_err(|_| SyncError::LockPoisoned)?;
        statuses.remove(table_id);
        Ok(())
    }
}
