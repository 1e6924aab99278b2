//! Table index synchronization orchestrator.
//!
//! ```text
//! message ─→ DELETE? ──yes──→ drop index, status table and status ─→ Success
//!              │ no
//!              ↓
//!        token current? ──no──→ Success (stale, dropped)
//!              │ yes
//!              ↓
//!        try lock ──busy──→ RecoverableFailure (redelivered later)
//!              │
//!              ↓
//!        token still current? ──no──→ Success
//!              │ yes
//!              ↓
//!        schema sync ─→ verify watermark ─→ replay rows above it ─→ watermark ─→ Available
//!              │ error
//!              ↓
//!        Failed (unless recoverable) ─→ UnrecoverableFailure
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use table_index_core::lock::{ExclusiveLockManager, LeaseGuard};
use table_index_core::message::{ChangeMessage, ChangeType, ObjectType};
use table_index_core::model::{group_rows_by_version, ColumnModel, ResetToken, TableId};
use table_index_core::status::{TableStatus, TableStatusRegister};
use table_index_core::table::TableIndexStore;
use table_index_core::truth::RowTruthStore;
use table_index_core::{SyncConfig, SyncError};

use crate::progress::WorkerProgress;
use crate::queue::QueueMessage;
use crate::Result;

/// Result of handling one change message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Done, or nothing to do; the message is removed
    Success,
    /// Retry later; the message stays queued
    RecoverableFailure,
    /// Will not succeed on retry; the message is removed
    UnrecoverableFailure,
}

impl SyncOutcome {
    /// Returns true if the message should be removed from the queue.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncOutcome::RecoverableFailure)
    }
}

/// Synchronizes table indexes with the truth store, one message at a time.
pub struct TableWorker {
    index: Arc<dyn TableIndexStore>,
    status: Arc<dyn TableStatusRegister>,
    locks: Arc<dyn ExclusiveLockManager>,
    truth: Arc<dyn RowTruthStore>,
    config: SyncConfig,
}

impl TableWorker {
    pub fn new(
        index: Arc<dyn TableIndexStore>,
        status: Arc<dyn TableStatusRegister>,
        locks: Arc<dyn ExclusiveLockManager>,
        truth: Arc<dyn RowTruthStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            index,
            status,
            locks,
            truth,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Handles a batch of received messages.
    ///
    /// Returns the receipts of the messages that must be removed from the
    /// queue. Only messages that hit a recoverable failure are kept.
    pub fn process_batch<F>(&self, messages: &[QueueMessage], progress_for: F) -> Vec<String>
    where
        F: Fn(&QueueMessage) -> Box<dyn WorkerProgress>,
    {
        let mut processed = Vec::with_capacity(messages.len());
        for message in messages {
            if !self.config.enabled {
                tracing::debug!(message_id = %message.message_id, "Table indexing disabled; dropping message");
                processed.push(message.receipt_handle.clone());
                continue;
            }

            let change = match ChangeMessage::from_body(&message.body) {
                Ok(change) => change,
                Err(e) => {
                    tracing::error!(message_id = %message.message_id, "Dropping unreadable message: {}", e);
                    processed.push(message.receipt_handle.clone());
                    continue;
                }
            };

            if change.object_type != ObjectType::Table {
                tracing::debug!(
                    message_id = %message.message_id,
                    object_type = ?change.object_type,
                    "Ignoring non-table message"
                );
                processed.push(message.receipt_handle.clone());
                continue;
            }

            let progress = progress_for(message);
            let outcome = self.handle(&change, progress.as_ref());
            if outcome.is_terminal() {
                processed.push(message.receipt_handle.clone());
            }
        }
        processed
    }

    /// Handles a single table change message.
    pub fn handle(&self, message: &ChangeMessage, progress: &dyn WorkerProgress) -> SyncOutcome {
        let table_id = &message.object_id;
        let result = match message.change_type {
            ChangeType::Delete => self.delete_index(table_id).map(|()| SyncOutcome::Success),
            ChangeType::Create | ChangeType::Update => self.create_or_update(message, progress),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(table = %table_id, "Will retry table change: {}", e);
                SyncOutcome::RecoverableFailure
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(table = %table_id, "Dropping change for vanished table: {}", e);
                SyncOutcome::UnrecoverableFailure
            }
            Err(e) => {
                tracing::error!(table = %table_id, "Dropping table change: {}", e);
                SyncOutcome::UnrecoverableFailure
            }
        }
    }

    /// Drops the index table, its status table and its status record.
    fn delete_index(&self, table_id: &TableId) -> Result<()> {
        self.index.delete_table(table_id)?;
        self.index.delete_status_table(table_id)?;
        self.status.delete(table_id)?;
        tracing::info!(table = %table_id, "Deleted table index");
        Ok(())
    }

    fn create_or_update(
        &self,
        message: &ChangeMessage,
        progress: &dyn WorkerProgress,
    ) -> Result<SyncOutcome> {
        let table_id = &message.object_id;

        let status = self.status.get_or_create(table_id)?;
        if status.reset_token != message.object_etag {
            tracing::debug!(table = %table_id, token = %message.object_etag, "Skipping stale message");
            return Ok(SyncOutcome::Success);
        }

        let guard = LeaseGuard::try_acquire(
            self.locks.as_ref(),
            &table_id.lock_key(),
            self.config.lock_timeout(),
        )?;

        // The table may have been reset while we waited for the lock
        let status = self.status.get_or_create(table_id)?;
        if status.reset_token != message.object_etag {
            tracing::debug!(table = %table_id, token = %message.object_etag, "Token changed before lock was held");
            return Ok(SyncOutcome::Success);
        }
        let TableStatus {
            reset_token: token,
            last_successful_etag,
            ..
        } = status;

        let outcome = match self.sync_index_with_table(
            table_id,
            &token,
            last_successful_etag.as_deref(),
            &guard,
            progress,
        ) {
            Ok(()) => {
                tracing::info!(table = %table_id, "Table index is available");
                SyncOutcome::Success
            }
            Err(e) => self.fail_locked(table_id, &token, e),
        };

        if let Err(e) = guard.release() {
            tracing::warn!(table = %table_id, "Failed to release table lock: {}", e);
        }
        Ok(outcome)
    }

    /// Classifies an error raised while the table lock was held.
    fn fail_locked(&self, table_id: &TableId, token: &ResetToken, error: SyncError) -> SyncOutcome {
        if error.is_recoverable() {
            tracing::warn!(table = %table_id, "Table sync interrupted, will retry: {}", error);
            return SyncOutcome::RecoverableFailure;
        }

        if let SyncError::StaleToken { .. } = error {
            // A newer message carries the current token
            tracing::debug!(table = %table_id, "Table was reset during sync: {}", error);
            return SyncOutcome::UnrecoverableFailure;
        }

        if error.is_not_found() {
            tracing::warn!(table = %table_id, "Table vanished from the truth store during sync: {}", error);
        } else {
            tracing::error!(table = %table_id, "Table sync failed: {}", error);
        }
        let detail = error.diagnostic_detail(&format!("synchronizing index of table '{}'", table_id));
        if let Err(e) = self
            .status
            .mark_failed(table_id, token, &error.to_string(), &detail)
        {
            tracing::warn!(table = %table_id, "Failed to record table failure: {}", e);
        }
        SyncOutcome::UnrecoverableFailure
    }

    /// Brings the index of `table_id` up to date with the truth store and marks it available.
    ///
    /// `synced_etag` is the etag the table was last marked available with.
    fn sync_index_with_table(
        &self,
        table_id: &TableId,
        token: &ResetToken,
        synced_etag: Option<&str>,
        guard: &LeaseGuard<'_>,
        progress: &dyn WorkerProgress,
    ) -> Result<()> {
        let schema = self.truth.get_column_models_for_table(table_id)?;
        if schema.is_empty() {
            self.index.delete_table(table_id)?;
            self.index.delete_status_table(table_id)?;
            let last_change = self.truth.get_last_table_row_change(table_id)?;
            return self
                .status
                .mark_available(table_id, token, last_change.map(|c| c.etag));
        }

        if self.index.create_or_update_table(&schema, table_id)? {
            tracing::debug!(table = %table_id, columns = schema.len(), "Index schema updated");
        }

        let floor = self.verified_floor(table_id, &schema, synced_etag)?;
        let Some(last_change) = self.truth.get_last_table_row_change(table_id)? else {
            return self.status.mark_available(table_id, token, None);
        };

        if floor.is_some_and(|floor| floor >= last_change.version) {
            tracing::debug!(table = %table_id, version = last_change.version, "Index already current");
            return self
                .status
                .mark_available(table_id, token, Some(last_change.etag));
        }

        if let Some(max_row_id) = self.truth.get_max_row_id(table_id)? {
            let changed = self.scan_changed_rows(table_id, floor, max_row_id, guard, progress)?;
            self.apply_changed_rows(table_id, token, &schema, changed, guard, progress)?;
        }

        self.index
            .set_max_current_complete_version_for_table(table_id, last_change.version)?;
        self.status
            .mark_available(table_id, token, Some(last_change.etag))
    }

    /// Complete-version floor of the index, if it still describes the truth history.
    ///
    /// The truth change at the floor must carry the etag the table was last
    /// marked available with. Otherwise the index was replayed from a
    /// different history; it is dropped and rebuilt from scratch.
    fn verified_floor(
        &self,
        table_id: &TableId,
        schema: &[ColumnModel],
        synced_etag: Option<&str>,
    ) -> Result<Option<u64>> {
        let Some(floor) = self.index.get_max_current_complete_version_for_table(table_id)? else {
            return Ok(None);
        };
        let truth_etag = self
            .truth
            .get_table_row_change(table_id, floor)?
            .map(|change| change.etag);
        if truth_etag.is_some() && truth_etag.as_deref() == synced_etag {
            return Ok(Some(floor));
        }

        tracing::warn!(
            table = %table_id,
            floor,
            "Index complete version does not match the truth history; rebuilding"
        );
        self.index.delete_table(table_id)?;
        self.index.delete_status_table(table_id)?;
        self.index.create_or_update_table(schema, table_id)?;
        Ok(None)
    }

    /// Collects the current version of every row changed above `floor`,
    /// scanning row ids `0..=max_row_id` in batches.
    ///
    /// Every batch is collected before any row is fetched, so memory grows
    /// with the number of changed rows rather than with one batch. In exchange
    /// a version spread over several scan batches costs one `get_row_set` per
    /// `batch_size` rows instead of one per scan batch.
    fn scan_changed_rows(
        &self,
        table_id: &TableId,
        floor: Option<u64>,
        max_row_id: u64,
        guard: &LeaseGuard<'_>,
        progress: &dyn WorkerProgress,
    ) -> Result<BTreeMap<u64, u64>> {
        let batch_size = self.config.batch_size.max(1) as u64;
        let mut changed = BTreeMap::new();
        let mut offset = 0u64;
        while offset <= max_row_id {
            self.heartbeat(table_id, guard, progress)?;
            let versions = self
                .truth
                .get_current_row_versions(table_id, floor, offset, batch_size)?;
            changed.extend(versions);
            offset = match offset.checked_add(batch_size) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(changed)
    }

    /// Fetches and applies changed rows one version at a time.
    ///
    /// Row sets are fetched in chunks of at most `batch_size` rows.
    fn apply_changed_rows(
        &self,
        table_id: &TableId,
        token: &ResetToken,
        schema: &[ColumnModel],
        changed: BTreeMap<u64, u64>,
        guard: &LeaseGuard<'_>,
        progress: &dyn WorkerProgress,
    ) -> Result<()> {
        let batch_size = self.config.batch_size.max(1);
        let total = changed.len() as u64;
        let mut applied = 0u64;

        for (version, row_ids) in group_rows_by_version(&changed) {
            let row_ids: Vec<u64> = row_ids.into_iter().collect();
            for chunk in row_ids.chunks(batch_size) {
                self.heartbeat(table_id, guard, progress)?;
                self.status.update_progress(
                    table_id,
                    token,
                    &format!("Applying {} rows at version {}", chunk.len(), version),
                    applied,
                    total,
                )?;

                let chunk: BTreeSet<u64> = chunk.iter().copied().collect();
                let row_set = self.truth.get_row_set(table_id, version, &chunk)?;
                self.index.create_or_update_or_delete_rows(&row_set, schema)?;
                applied += chunk.len() as u64;
            }
        }

        tracing::debug!(table = %table_id, rows = applied, "Replayed changed rows");
        Ok(())
    }

    /// Stops on cancellation, then keeps the message and the lease alive.
    fn heartbeat(
        &self,
        table_id: &TableId,
        guard: &LeaseGuard<'_>,
        progress: &dyn WorkerProgress,
    ) -> Result<()> {
        if progress.is_cancelled() {
            return Err(SyncError::Interrupted(format!(
                "sync of table '{}' cancelled",
                table_id
            )));
        }
        progress.progress_made();
        guard.renew()
    }
}
