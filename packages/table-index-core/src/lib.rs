//! Core storage contracts for table index synchronization.
//!
//! Provides the queryable table index, the table status register,
//! leased exclusive locks, the row truth store contract, and snapshot
//! persistence.

pub mod config;
pub mod error;
pub mod lock;
pub mod message;
pub mod model;
pub mod persistence;
pub mod status;
pub mod table;
pub mod truth;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
