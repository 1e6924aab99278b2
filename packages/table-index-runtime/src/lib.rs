//! Message-driven table index synchronization.
//!
//! [`TableWorker`] turns table change messages into index replays,
//! [`WorkerPool`] runs workers against a [`MessageQueue`], and
//! [`TableChangePublisher`] writes to the truth store and announces the
//! change with a fresh reset token.

pub mod pool;
pub mod progress;
pub mod publisher;
pub mod queue;
pub mod worker;

pub use pool::{PoolStats, WorkerPool};
pub use progress::{MessageProgress, NoProgress, WorkerProgress};
pub use publisher::TableChangePublisher;
pub use queue::{InMemoryMessageQueue, MessageQueue, QueueMessage};
pub use worker::{SyncOutcome, TableWorker};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, table_index_core::SyncError>;
