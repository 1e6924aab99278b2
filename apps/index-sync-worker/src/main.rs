//! Table index synchronization worker.
//!
//! Loads a workload of table changes into an in-memory truth store,
//! publishes a change message per write, and runs a pool of workers until
//! every table index settles. Prints the final table statuses as JSON.

mod workload;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use table_index_core::lock::InMemoryLockManager;
use table_index_core::persistence::SnapshotManager;
use table_index_core::status::{InMemoryStatusRegister, TableState, TableStatus, TableStatusRegister};
use table_index_core::table::{InMemoryTableIndex, TableIndexStore};
use table_index_core::truth::InMemoryTruthStore;
use table_index_core::{SyncConfig, SyncError};
use table_index_runtime::{
    InMemoryMessageQueue, MessageQueue, PoolStats, TableChangePublisher, TableWorker, WorkerPool,
};
use tokio::signal;

use crate::workload::Workload;

/// Command-line arguments for the synchronization worker.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workload JSON file
    workload: PathBuf,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Row ids scanned per replay batch
    #[arg(long, default_value_t = 16_000)]
    batch_size: usize,

    /// Table lock lease in milliseconds
    #[arg(long, default_value_t = 60_000)]
    lock_timeout_ms: u64,

    /// Message visibility timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    visibility_timeout_ms: u64,

    /// Maximum messages received per poll
    #[arg(long, default_value_t = 10)]
    message_batch_size: usize,

    /// Idle poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// Drop every message without indexing
    #[arg(long)]
    disabled: bool,

    /// Restore from and flush a snapshot to this directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Give up waiting for tables to settle after this many seconds
    #[arg(long, default_value_t = 300)]
    settle_timeout_secs: u64,
}

impl Args {
    fn to_config(&self) -> SyncConfig {
        let mut config = SyncConfig {
            enabled: !self.disabled,
            batch_size: self.batch_size,
            lock_timeout_ms: self.lock_timeout_ms,
            worker_count: self.workers,
            message_batch_size: self.message_batch_size,
            visibility_timeout_ms: self.visibility_timeout_ms,
            poll_interval_ms: self.poll_interval_ms,
            ..Default::default()
        };
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        config
    }
}

/// Final state of one table.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReport {
    #[serde(flatten)]
    status: TableStatus,
    row_count: Option<usize>,
    complete_version: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    pool: PoolStats,
    settled: bool,
    tables: Vec<TableReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt::init();

    let config = args.to_config();
    let snapshots = args.data_dir.as_ref().map(|_| SnapshotManager::new(&config));

    let (index, status, truth) = match snapshots.as_ref().map(|s| s.load()).transpose() {
        Ok(Some(Some(restored))) => (restored.index, restored.status, restored.truth),
        Ok(_) => (
            InMemoryTableIndex::new(),
            InMemoryStatusRegister::new(),
            InMemoryTruthStore::new(),
        ),
        Err(SyncError::DataCorruption(msg)) => {
            tracing::error!("Snapshot corruption detected: {}", msg);
            anyhow::bail!("snapshot in {} is corrupt", config.data_dir.display());
        }
        Err(e) => return Err(e).context("load snapshot"),
    };
    let index = Arc::new(index);
    let status = Arc::new(status);
    let truth = Arc::new(truth);
    let queue = Arc::new(InMemoryMessageQueue::new());
    let locks = Arc::new(InMemoryLockManager::new());

    let workload = Workload::load(&args.workload)?;
    let publisher = TableChangePublisher::new(truth.clone(), status.clone(), queue.clone());
    let published = workload.publish(&publisher, &truth)?;

    println!("Starting table index synchronization...");
    println!("  Tables: {}", workload.tables.len());
    println!("  Changes published: {}", published);
    println!("  Workers: {}", config.worker_count);
    println!("  Batch size: {}", config.batch_size);

    let worker = Arc::new(TableWorker::new(
        index.clone(),
        status.clone(),
        locks,
        truth.clone(),
        config.clone(),
    ));
    let pool = WorkerPool::start(worker, queue.clone()).context("start worker pool")?;

    let table_ids = workload.table_ids();
    let settle = wait_until_settled(queue.as_ref(), status.as_ref(), &table_ids);
    let settled = tokio::select! {
        settled = tokio::time::timeout(Duration::from_secs(args.settle_timeout_secs), settle) => {
            settled.is_ok()
        }
        result = signal::ctrl_c() => {
            result.context("listen for ctrl_c")?;
            println!("\nShutting down workers...");
            false
        }
    };

    let stats = tokio::task::spawn_blocking(move || pool.shutdown())
        .await
        .context("join worker pool")?;

    if let Some(snapshots) = &snapshots {
        snapshots
            .flush(&index, &status, &truth)
            .context("flush snapshot")?;
        println!("Snapshot written to {}", config.data_dir.display());
    }

    let mut tables = Vec::new();
    for table_id in &table_ids {
        let Some(table_status) = status.get(table_id)? else {
            continue;
        };
        tables.push(TableReport {
            status: table_status,
            row_count: index.get_row_count_for_table(table_id)?,
            complete_version: index.get_max_current_complete_version_for_table(table_id)?,
        });
    }
    let report = Report {
        pool: stats,
        settled,
        tables,
    };
    println!("{}", serde_json::to_string_pretty(&report).context("serialize report")?);

    if !settled {
        tracing::warn!("Stopped before every table settled");
    }
    Ok(())
}

/// Resolves once the queue is empty and no table is pending or processing.
async fn wait_until_settled(
    queue: &dyn MessageQueue,
    status: &dyn TableStatusRegister,
    table_ids: &[table_index_core::model::TableId],
) {
    let mut interval = tokio::time::interval(Duration::from_millis(50));
    loop {
        interval.tick().await;
        if is_settled(queue, status, table_ids).unwrap_or(false) {
            return;
        }
    }
}

fn is_settled(
    queue: &dyn MessageQueue,
    status: &dyn TableStatusRegister,
    table_ids: &[table_index_core::model::TableId],
) -> table_index_core::Result<bool> {
    if !queue.is_empty()? {
        return Ok(false);
    }
    for table_id in table_ids {
        if let Some(table_status) = status.get(table_id)? {
            if !matches!(table_status.state, TableState::Available | TableState::Failed) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}
