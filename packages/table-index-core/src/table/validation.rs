//! Conversion of raw truth-store strings into typed index cells.

use std::collections::HashSet;

use super::cell::CellValue;
use crate::error::{Result, SyncError};
use crate::model::{ColumnModel, ColumnType, TableId};

/// Parses a raw cell for `column`.
///
/// Missing and empty values become NULL for every non-string column.
pub(crate) fn parse_cell(column: &ColumnModel, raw: Option<&str>) -> Result<CellValue> {
    let Some(raw) = raw else {
        return Ok(CellValue::Null);
    };
    if raw.is_empty() && column.column_type != ColumnType::String {
        return Ok(CellValue::Null);
    }

    let invalid = || SyncError::InvalidValue {
        column: column.id,
        value: raw.to_string(),
        expected: column.column_type.to_string(),
    };

    match column.column_type {
        ColumnType::String => {
            if let Some(max) = column.maximum_size {
                if raw.chars().count() > max {
                    return Err(SyncError::InvalidValue {
                        column: column.id,
                        value: raw.to_string(),
                        expected: format!("STRING of at most {} characters", max),
                    });
                }
            }
            Ok(CellValue::String(raw.to_string()))
        }
        ColumnType::Integer | ColumnType::Date | ColumnType::FileHandleId => raw
            .trim()
            .parse::<i64>()
            .map(CellValue::Integer)
            .map_err(|_| invalid()),
        ColumnType::EntityId => {
            let trimmed = raw.trim();
            let digits = match trimmed.get(..3) {
                Some(prefix) if prefix.eq_ignore_ascii_case("syn") => &trimmed[3..],
                _ => trimmed,
            };
            digits
                .parse::<i64>()
                .map(CellValue::Integer)
                .map_err(|_| invalid())
        }
        ColumnType::Double => raw
            .trim()
            .parse::<f64>()
            .map(CellValue::Double)
            .map_err(|_| invalid()),
        ColumnType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(CellValue::Boolean(true)),
            "false" => Ok(CellValue::Boolean(false)),
            _ => Err(invalid()),
        },
    }
}

/// Value used for `column` when a row set does not supply it.
pub(crate) fn default_cell(column: &ColumnModel) -> Result<CellValue> {
    parse_cell(column, column.default_value.as_deref())
}

/// Converts an existing cell after its column changed type; NULL if not convertible.
pub(crate) fn convert_cell(cell: &CellValue, column: &ColumnModel) -> CellValue {
    match cell.as_text() {
        Some(text) => parse_cell(column, Some(&text)).unwrap_or(CellValue::Null),
        None => CellValue::Null,
    }
}

/// Validates that column ids are unique within a schema.
pub(crate) fn validate_schema(table_id: &TableId, schema: &[ColumnModel]) -> Result<()> {
    let mut seen = HashSet::new();
    for column in schema {
        if !seen.insert(column.id) {
            return Err(SyncError::InvalidRowSet {
                table: table_id.clone(),
                reason: format!("column {} appears more than once in the schema", column.id),
            });
        }
    }
    Ok(())
}
