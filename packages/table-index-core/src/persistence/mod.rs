//! Snapshot persistence of the index store, status register and truth store.
//!
//! The index is only meaningful against the truth history it was replayed
//! from, so the three are flushed and restored together.
//!
//! A snapshot is three JSON files plus a manifest holding their CRC32
//! checksums. Data files are written before the manifest, each through a
//! synced temporary file and an atomic rename, so a crash mid-flush leaves
//! the previous manifest pointing at checksums the new files will not match.

pub mod io_utils;


use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::message::now_millis;
use crate::status::{InMemoryStatusRegister, TableStatus};
use crate::table::{IndexSnapshot, InMemoryTableIndex};
use crate::truth::{InMemoryTruthStore, TruthSnapshot};

use self::io_utils::{classify_io_error, retry_io_operation, write_atomic};

const MANIFEST_FILE: &str = "manifest.json";
const INDEX_FILE: &str = "index.json";
const STATUS_FILE: &str = "status.json";
const TRUTH_FILE: &str = "truth.json";
const MANIFEST_VERSION: u32 = 2;

/// Manifest describing the last completed flush.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Manifest format version
    pub version: u32,
    /// Milliseconds since the epoch when the flush completed
    pub written_at: u64,
    /// CRC32 of each data file by file name
    pub checksums: BTreeMap<String, u32>,
}

/// Stores restored from disk.
#[derive(Debug)]
pub struct RestoredState {
    pub index: InMemoryTableIndex,
    pub status: InMemoryStatusRegister,
    pub truth: InMemoryTruthStore,
}

/// Flushes and restores snapshots in a data directory.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    data_dir: PathBuf,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl SnapshotManager {
    /// Creates a manager for `config.data_dir`.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            max_retries: config.persistence_max_retries,
            retry_delay_ms: config.persistence_retry_delay_ms,
        }
    }

    /// Writes the index store, status register and truth store to disk.
    pub fn flush(
        &self,
        index: &InMemoryTableIndex,
        status: &InMemoryStatusRegister,
        truth: &InMemoryTruthStore,
    ) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| classify_io_error(e, "creating data directory"))?;

        let index_bytes = serde_json::to_vec(&index.snapshot()?)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        let status_bytes = serde_json::to_vec(&status.records()?)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        let truth_bytes = serde_json::to_vec(&truth.snapshot()?)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;

        let mut checksums = BTreeMap::new();
        for (name, bytes) in [
            (INDEX_FILE, &index_bytes),
            (STATUS_FILE, &status_bytes),
            (TRUTH_FILE, &truth_bytes),
        ] {
            self.write_file(name, bytes)?;
            checksums.insert(name.to_string(), checksum(bytes));
        }

        let manifest = SnapshotManifest {
            version: MANIFEST_VERSION,
            written_at: now_millis(),
            checksums,
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        self.write_file(MANIFEST_FILE, &manifest_bytes)?;

        tracing::debug!(
            data_dir = %self.data_dir.display(),
            index_bytes = index_bytes.len(),
            status_bytes = status_bytes.len(),
            truth_bytes = truth_bytes.len(),
            "Snapshot flushed"
        );
        Ok(())
    }

    /// Loads the last flushed snapshot, or None if nothing was ever flushed.
    pub fn load(&self) -> Result<Option<RestoredState>> {
        let manifest_path = self.data_dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(None);
        }

        let manifest_bytes =
            fs::read(&manifest_path).map_err(|e| classify_io_error(e, "reading manifest"))?;
        let manifest: SnapshotManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| SyncError::DataCorruption(format!("Unreadable manifest: {}", e)))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(SyncError::Serialization(format!(
                "Unsupported manifest version: {}",
                manifest.version
            )));
        }

        let snapshot: IndexSnapshot = self.read_verified(&manifest, INDEX_FILE)?;
        let records: Vec<TableStatus> = self.read_verified(&manifest, STATUS_FILE)?;
        let truth: TruthSnapshot = self.read_verified(&manifest, TRUTH_FILE)?;

        tracing::info!(
            tables = snapshot.tables.len(),
            statuses = records.len(),
            truth_tables = truth.table_count(),
            "Snapshot restored"
        );
        Ok(Some(RestoredState {
            index: InMemoryTableIndex::from_snapshot(snapshot),
            status: InMemoryStatusRegister::from_records(records),
            truth: InMemoryTruthStore::from_snapshot(truth),
        }))
    }

    fn write_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.data_dir.join(name);
        retry_io_operation(
            || write_atomic(&path, bytes),
            self.max_retries,
            self.retry_delay_ms,
            name,
        )
    }

    fn read_verified<T>(&self, manifest: &SnapshotManifest, name: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let expected = manifest.checksums.get(name).ok_or_else(|| {
            SyncError::DataCorruption(format!("Manifest has no checksum for '{}'", name))
        })?;

        let path = self.data_dir.join(name);
        let bytes = retry_io_operation(
            || fs::read(&path).map_err(|e| classify_io_error(e, name)),
            self.max_retries,
            self.retry_delay_ms,
            name,
        )?;

        let actual = checksum(&bytes);
        if actual != *expected {
            return Err(SyncError::DataCorruption(format!(
                "Checksum mismatch for '{}': expected {:08x}, got {:08x}",
                name, expected, actual
            )));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::Serialization(format!("Failed to parse '{}': {}", name, e)))
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
