//! Shared fixtures for runtime integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use table_index_core::lock::InMemoryLockManager;
use table_index_core::model::{ColumnId, ColumnModel, ColumnType, RowSet, TableId, TableRowChange};
use table_index_core::status::InMemoryStatusRegister;
use table_index_core::table::{IndexedRow, InMemoryTableIndex, TableIndexStore};
use table_index_core::truth::{InMemoryTruthStore, RowTruthStore};
use table_index_core::{Result, SyncConfig, SyncError};
use table_index_runtime::{InMemoryMessageQueue, TableChangePublisher, TableWorker, WorkerProgress};

/// Truth store wrapper counting row set fetches, optionally pausing on schema reads.
pub struct InstrumentedTruth {
    pub inner: Arc<InMemoryTruthStore>,
    pub row_set_calls: AtomicUsize,
    gate: Option<(Mutex<Sender<()>>, Mutex<Receiver<()>>)>,
}

impl InstrumentedTruth {
    pub fn new(inner: Arc<InMemoryTruthStore>) -> Self {
        Self {
            inner,
            row_set_calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Pauses the first schema read until the returned sender fires.
    ///
    /// The returned receiver fires when the read is reached.
    pub fn gated(inner: Arc<InMemoryTruthStore>) -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let truth = Self {
            inner,
            row_set_calls: AtomicUsize::new(0),
            gate: Some((Mutex::new(entered_tx), Mutex::new(release_rx))),
        };
        (truth, entered_rx, release_tx)
    }

    pub fn row_set_calls(&self) -> usize {
        self.row_set_calls.load(Ordering::SeqCst)
    }
}

impl RowTruthStore for InstrumentedTruth {
    fn get_column_models_for_table(&self, table_id: &TableId) -> Result<Vec<ColumnModel>> {
        if let Some((entered, release)) = &self.gate {
            let _ = entered.lock().unwrap().send(());
            let _ = release.lock().unwrap().recv();
        }
        self.inner.get_column_models_for_table(table_id)
    }

    fn get_last_table_row_change(&self, table_id: &TableId) -> Result<Option<TableRowChange>> {
        self.inner.get_last_table_row_change(table_id)
    }

    fn get_table_row_change(
        &self,
        table_id: &TableId,
        version: u64,
    ) -> Result<Option<TableRowChange>> {
        self.inner.get_table_row_change(table_id, version)
    }

    fn get_max_row_id(&self, table_id: &TableId) -> Result<Option<u64>> {
        self.inner.get_max_row_id(table_id)
    }

    fn get_current_row_versions(
        &self,
        table_id: &TableId,
        floor_exclusive: Option<u64>,
        offset: u64,
        limit: u64,
    ) -> Result<BTreeMap<u64, u64>> {
        self.inner
            .get_current_row_versions(table_id, floor_exclusive, offset, limit)
    }

    fn get_row_set(
        &self,
        table_id: &TableId,
        version: u64,
        row_ids: &BTreeSet<u64>,
    ) -> Result<RowSet> {
        self.row_set_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_row_set(table_id, version, row_ids)
    }
}

/// Index store wrapper counting mutations, optionally failing one row apply.
pub struct InstrumentedIndex {
    pub inner: Arc<InMemoryTableIndex>,
    mutations: AtomicUsize,
    applies: AtomicUsize,
    fail_on_apply: Option<usize>,
}

impl InstrumentedIndex {
    pub fn new(inner: Arc<InMemoryTableIndex>) -> Self {
        Self {
            inner,
            mutations: AtomicUsize::new(0),
            applies: AtomicUsize::new(0),
            fail_on_apply: None,
        }
    }

    /// Fails the `n`th call (1-based) to `create_or_update_or_delete_rows`.
    pub fn failing_on_apply(inner: Arc<InMemoryTableIndex>, n: usize) -> Self {
        Self {
            fail_on_apply: Some(n),
            ..Self::new(inner)
        }
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

impl TableIndexStore for InstrumentedIndex {
    fn create_or_update_table(&self, schema: &[ColumnModel], table_id: &TableId) -> Result<bool> {
        self.mutated();
        self.inner.create_or_update_table(schema, table_id)
    }

    fn delete_table(&self, table_id: &TableId) -> Result<bool> {
        self.mutated();
        self.inner.delete_table(table_id)
    }

    fn delete_status_table(&self, table_id: &TableId) -> Result<()> {
        self.mutated();
        self.inner.delete_status_table(table_id)
    }

    fn get_current_table_columns(&self, table_id: &TableId) -> Result<Option<Vec<ColumnId>>> {
        self.inner.get_current_table_columns(table_id)
    }

    fn create_or_update_or_delete_rows(
        &self,
        row_set: &RowSet,
        current_schema: &[ColumnModel],
    ) -> Result<()> {
        self.mutated();
        let call = self.applies.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_apply == Some(call) {
            return Err(SyncError::Io("simulated write failure".to_string()));
        }
        self.inner
            .create_or_update_or_delete_rows(row_set, current_schema)
    }

    fn get_max_current_complete_version_for_table(
        &self,
        table_id: &TableId,
    ) -> Result<Option<u64>> {
        self.inner.get_max_current_complete_version_for_table(table_id)
    }

    fn set_max_current_complete_version_for_table(
        &self,
        table_id: &TableId,
        version: u64,
    ) -> Result<()> {
        self.mutated();
        self.inner
            .set_max_current_complete_version_for_table(table_id, version)
    }

    fn get_row_count_for_table(&self, table_id: &TableId) -> Result<Option<usize>> {
        self.inner.get_row_count_for_table(table_id)
    }

    fn get_row(&self, table_id: &TableId, row_id: u64) -> Result<Option<IndexedRow>> {
        self.inner.get_row(table_id, row_id)
    }

    fn rows(&self, table_id: &TableId) -> Result<Option<Vec<(u64, IndexedRow)>>> {
        self.inner.rows(table_id)
    }
}

/// Progress context that runs a hook on every heartbeat.
pub struct HookProgress<F: Fn() + Send + Sync> {
    hook: F,
    cancelled: AtomicBool,
}

impl<F: Fn() + Send + Sync> HookProgress<F> {
    pub fn new(hook: F) -> Self {
        Self {
            hook,
            cancelled: AtomicBool::new(false),
        }
    }
}

impl<F: Fn() + Send + Sync> WorkerProgress for HookProgress<F> {
    fn progress_made(&self) {
        (self.hook)();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Progress context that is already cancelled.
pub struct Cancelled;

impl WorkerProgress for Cancelled {
    fn progress_made(&self) {}

    fn is_cancelled(&self) -> bool {
        true
    }
}

/// Shared stores behind a worker under test.
pub struct Fixture {
    pub truth: Arc<InMemoryTruthStore>,
    pub index: Arc<InMemoryTableIndex>,
    pub status: Arc<InMemoryStatusRegister>,
    pub locks: Arc<InMemoryLockManager>,
    pub queue: Arc<InMemoryMessageQueue>,
    pub publisher: TableChangePublisher,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_stores(
            Arc::new(InMemoryTruthStore::new()),
            Arc::new(InMemoryTableIndex::new()),
            Arc::new(InMemoryStatusRegister::new()),
        )
    }

    /// Fixture over existing stores, e.g. ones restored from a snapshot.
    pub fn with_stores(
        truth: Arc<InMemoryTruthStore>,
        index: Arc<InMemoryTableIndex>,
        status: Arc<InMemoryStatusRegister>,
    ) -> Self {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let publisher = TableChangePublisher::new(truth.clone(), status.clone(), queue.clone());
        Self {
            truth,
            index,
            status,
            locks: Arc::new(InMemoryLockManager::new()),
            queue,
            publisher,
        }
    }

    /// Worker over the plain in-memory stores.
    pub fn worker(&self, config: SyncConfig) -> TableWorker {
        self.worker_with(self.index.clone(), self.truth.clone(), config)
    }

    /// Worker over substitute index and truth stores.
    pub fn worker_with(
        &self,
        index: Arc<dyn TableIndexStore>,
        truth: Arc<dyn RowTruthStore>,
        config: SyncConfig,
    ) -> TableWorker {
        TableWorker::new(index, self.status.clone(), self.locks.clone(), truth, config)
    }
}

pub fn test_schema() -> Vec<ColumnModel> {
    vec![
        ColumnModel::new(1, "name", ColumnType::String),
        ColumnModel::new(2, "count", ColumnType::Integer),
    ]
}

pub fn cells(name: &str, count: u64) -> Vec<Option<String>> {
    vec![Some(name.to_string()), Some(count.to_string())]
}

/// Live index content as text, comparable to `InMemoryTruthStore::current_values`.
pub fn index_values(
    index: &InMemoryTableIndex,
    table_id: &TableId,
) -> BTreeMap<u64, BTreeMap<ColumnId, Option<String>>> {
    let Some(table) = index.table(table_id).unwrap() else {
        return BTreeMap::new();
    };
    table
        .rows
        .iter()
        .map(|(&row_id, row)| {
            let cells = table
                .columns
                .iter()
                .zip(&row.cells)
                .filter(|(_, cell)| !cell.is_null())
                .map(|(column, cell)| (column.id, cell.as_text()))
                .collect();
            (row_id, cells)
        })
        .collect()
}

/// Truth content with unset cells dropped.
pub fn truth_values(
    truth: &InMemoryTruthStore,
    table_id: &TableId,
) -> BTreeMap<u64, BTreeMap<ColumnId, Option<String>>> {
    truth
        .current_values(table_id)
        .unwrap()
        .into_iter()
        .map(|(row_id, cells)| {
            let cells = cells.into_iter().filter(|(_, v)| v.is_some()).collect();
            (row_id, cells)
        })
        .collect()
}
