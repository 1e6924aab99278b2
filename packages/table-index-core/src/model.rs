//! Identifiers, column models, and row sets shared by every component.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Column identifier.
pub type ColumnId = u64;

/// Table identifier (e.g. "syn123").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(String);

impl TableId {
    /// Creates a table identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource key of the table's exclusive lock.
    pub fn lock_key(&self) -> String {
        format!("table:{}", self.0)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque fencing token regenerated on every structural change to a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResetToken(String);

impl ResetToken {
    /// Wraps an existing token value.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generates a fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResetToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Column value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    String,
    Integer,
    Double,
    Boolean,
    /// Milliseconds since the epoch
    Date,
    EntityId,
    FileHandleId,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::String => "STRING",
            ColumnType::Integer => "INTEGER",
            ColumnType::Double => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::EntityId => "ENTITYID",
            ColumnType::FileHandleId => "FILEHANDLEID",
        };
        f.write_str(name)
    }
}

/// Column definition within a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnModel {
    /// Column identifier
    pub id: ColumnId,
    /// Display name
    pub name: String,
    /// Value type
    pub column_type: ColumnType,
    /// Default applied when a row set omits this column
    #[serde(default)]
    pub default_value: Option<String>,
    /// Maximum length of string values
    #[serde(default)]
    pub maximum_size: Option<usize>,
}

impl ColumnModel {
    /// Creates a column without default or size limit.
    pub fn new(id: ColumnId, name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            id,
            name: name.into(),
            column_type,
            default_value: None,
            maximum_size: None,
        }
    }

    /// Sets the default value.
    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    /// Sets the maximum string length.
    pub fn with_maximum_size(mut self, maximum_size: usize) -> Self {
        self.maximum_size = Some(maximum_size);
        self
    }
}

/// A single row change at a specific version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub row_id: u64,
    pub version_number: u64,
    /// Cells aligned with the row set headers; `None` marks a deleted row
    pub values: Option<Vec<Option<String>>>,
}

impl Row {
    /// Creates an upsert row.
    pub fn upsert(row_id: u64, version_number: u64, values: Vec<Option<String>>) -> Self {
        Self {
            row_id,
            version_number,
            values: Some(values),
        }
    }

    /// Creates a deletion marker.
    pub fn deletion(row_id: u64, version_number: u64) -> Self {
        Self {
            row_id,
            version_number,
            values: None,
        }
    }

    /// Returns true if this row removes the row from the table.
    pub fn is_deletion(&self) -> bool {
        self.values.is_none()
    }
}

/// Batch of row values at a specific version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSet {
    pub table_id: TableId,
    pub etag: Option<String>,
    /// Column ids the row cells are aligned with
    pub headers: Vec<ColumnId>,
    pub rows: Vec<Row>,
}

/// Descriptor of one change appended to the truth store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRowChange {
    pub table_id: TableId,
    /// Version number assigned to the change
    pub version: u64,
    /// Content identifier of the change
    pub etag: String,
    /// Column ids the change was written with
    pub headers: Vec<ColumnId>,
    /// Rows touched by the change
    pub row_count: usize,
}

/// Groups row ids by the version they must be fetched at.
///
/// Row sets are read at a single version, so rows whose current values
/// were written by different changes cannot be fetched together.
pub fn group_rows_by_version(row_versions: &BTreeMap<u64, u64>) -> BTreeMap<u64, BTreeSet<u64>> {
    let mut grouped: BTreeMap<u64, BTreeSet<u64>> = BTreeMap::new();
    for (&row_id, &version) in row_versions {
        grouped.entry(version).or_default().insert(row_id);
    }
    grouped
}
