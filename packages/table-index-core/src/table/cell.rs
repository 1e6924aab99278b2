//! Typed cell values stored in the index.

use serde::{Deserialize, Serialize};

/// A single typed value in an index row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    String(String),
    /// Integers, dates (epoch millis), entity ids and file handle ids
    Integer(i64),
    Double(f64),
    Boolean(bool),
}

impl CellValue {
    /// Returns true for SQL-style NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Renders the value in the string form the truth store uses.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::String(s) => Some(s.clone()),
            CellValue::Integer(i) => Some(i.to_string()),
            CellValue::Double(d) => Some(d.to_string()),
            CellValue::Boolean(b) => Some(b.to_string()),
        }
    }
}
