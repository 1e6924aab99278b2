//! Change notifications delivered by the message transport.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::model::{ResetToken, TableId};

/// Kind of object a change message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Table,
    Entity,
    File,
    #[serde(other)]
    Other,
}

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

/// Notification that an object was created, updated, or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMessage {
    pub object_id: TableId,
    pub object_type: ObjectType,
    pub change_type: ChangeType,
    /// Reset token of the table at the time of the change
    pub object_etag: ResetToken,
    /// Milliseconds since the epoch
    pub timestamp: u64,
    /// Publisher-assigned sequence number
    #[serde(default)]
    pub change_number: u64,
}

impl ChangeMessage {
    /// Creates a table change message stamped with the current time.
    pub fn table(
        table_id: TableId,
        change_type: ChangeType,
        reset_token: ResetToken,
        change_number: u64,
    ) -> Self {
        Self {
            object_id: table_id,
            object_type: ObjectType::Table,
            change_type,
            object_etag: reset_token,
            timestamp: now_millis(),
            change_number,
        }
    }

    /// Parses a message body.
    pub fn from_body(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    /// Serializes the message into a transport body.
    pub fn to_body(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
