//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Table index synchronization configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Messages are swallowed without work when false
    pub enabled: bool,
    /// Row ids scanned per replay batch
    pub batch_size: usize,
    /// Lease duration of the exclusive table lock in milliseconds
    pub lock_timeout_ms: u64,
    /// Number of worker threads
    pub worker_count: usize,
    /// Maximum messages received per poll
    pub message_batch_size: usize,
    /// Message visibility timeout in milliseconds
    pub visibility_timeout_ms: u64,
    /// Idle sleep between empty polls in milliseconds
    pub poll_interval_ms: u64,
    /// Data directory for snapshots
    pub data_dir: PathBuf,
    /// Maximum retry attempts for transient I/O errors
    pub persistence_max_retries: u32,
    /// Delay between retry attempts in milliseconds
    pub persistence_retry_delay_ms: u64,
}

impl SyncConfig {
    /// Lease duration as a `Duration`.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Visibility timeout as a `Duration`.
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 16_000,
            lock_timeout_ms: 60_000,
            worker_count: 4,
            message_batch_size: 10,
            visibility_timeout_ms: 30_000,
            poll_interval_ms: 100,
            data_dir: PathBuf::from("./data"),
            persistence_max_retries: 3,
            persistence_retry_delay_ms: 100,
        }
    }
}
