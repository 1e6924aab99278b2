use super::*;
use crate::error::SyncError;
use crate::model::{ColumnModel, ColumnType, Row, RowSet, TableId};
use ntest::timeout;

fn table_id() -> TableId {
    TableId::new("syn123")
}

fn create_test_schema() -> Vec<ColumnModel> {
    vec![
        ColumnModel::new(1, "name", ColumnType::String).with_maximum_size(10),
        ColumnModel::new(2, "age", ColumnType::Integer),
        ColumnModel::new(3, "active", ColumnType::Boolean).with_default("true"),
    ]
}

fn row_set(headers: Vec<u64>, rows: Vec<Row>) -> RowSet {
    RowSet {
        table_id: table_id(),
        etag: None,
        headers,
        rows,
    }
}

fn values(cells: &[Option<&str>]) -> Vec<Option<String>> {
    cells.iter().map(|c| c.map(str::to_string)).collect()
}

fn create_test_index() -> InMemoryTableIndex {
    let index = InMemoryTableIndex::new();
    index
        .create_or_update_table(&create_test_schema(), &table_id())
        .unwrap();
    index
}

#[test]
#[timeout(1000)]
fn test_create_table_and_read_columns() {
    let index = InMemoryTableIndex::new();
    assert_eq!(index.get_current_table_columns(&table_id()).unwrap(), None);

    let changed = index
        .create_or_update_table(&create_test_schema(), &table_id())
        .unwrap();
    assert!(changed);
    assert_eq!(
        index.get_current_table_columns(&table_id()).unwrap(),
        Some(vec![1, 2, 3])
    );
    assert_eq!(index.get_row_count_for_table(&table_id()).unwrap(), Some(0));
}

#[test]
#[timeout(1000)]
fn test_same_schema_is_not_a_change() {
    let index = create_test_index();
    let changed = index
        .create_or_update_table(&create_test_schema(), &table_id())
        .unwrap();
    assert!(!changed);
}

#[test]
#[timeout(1000)]
fn test_duplicate_column_rejected() {
    let index = InMemoryTableIndex::new();
    let schema = vec![
        ColumnModel::new(1, "a", ColumnType::String),
        ColumnModel::new(1, "b", ColumnType::Integer),
    ];
    let result = index.create_or_update_table(&schema, &table_id());
    assert!(matches!(result, Err(SyncError::InvalidRowSet { .. })));
}

#[test]
#[timeout(1000)]
fn test_upsert_rows() {
    let index = create_test_index();
    let rows = row_set(
        vec![1, 2, 3],
        vec![
            Row::upsert(0, 1, values(&[Some("alice"), Some("30"), Some("false")])),
            Row::upsert(1, 1, values(&[Some("bob"), None, None])),
        ],
    );

    index
        .create_or_update_or_delete_rows(&rows, &create_test_schema())
        .unwrap();

    assert_eq!(index.get_row_count_for_table(&table_id()).unwrap(), Some(2));
    let alice = index.get_row(&table_id(), 0).unwrap().unwrap();
    assert_eq!(alice.version_number, 1);
    assert_eq!(
        alice.cells,
        vec![
            CellValue::String("alice".into()),
            CellValue::Integer(30),
            CellValue::Boolean(false)
        ]
    );
    let bob = index.get_row(&table_id(), 1).unwrap().unwrap();
    assert_eq!(bob.cells[1], CellValue::Null);
}

#[test]
#[timeout(1000)]
fn test_upsert_is_idempotent() {
    let index = create_test_index();
    let rows = row_set(
        vec![1, 2],
        vec![Row::upsert(5, 2, values(&[Some("carol"), Some("41")]))],
    );

    index
        .create_or_update_or_delete_rows(&rows, &create_test_schema())
        .unwrap();
    let first = index.table(&table_id()).unwrap().unwrap();
    index
        .create_or_update_or_delete_rows(&rows, &create_test_schema())
        .unwrap();
    let second = index.table(&table_id()).unwrap().unwrap();

    assert_eq!(first.rows, second.rows);
    assert_eq!(second.row_count(), 1);
}

#[test]
#[timeout(1000)]
fn test_missing_header_takes_default() {
    let index = create_test_index();
    let rows = row_set(vec![1], vec![Row::upsert(0, 1, values(&[Some("dave")]))]);

    index
        .create_or_update_or_delete_rows(&rows, &create_test_schema())
        .unwrap();

    let table = index.table(&table_id()).unwrap().unwrap();
    assert_eq!(table.cell(0, 2), Some(&CellValue::Null));
    assert_eq!(table.cell(0, 3), Some(&CellValue::Boolean(true)));
}

#[test]
#[timeout(1000)]
fn test_header_outside_schema_ignored() {
    let index = create_test_index();
    // Column 9 was dropped from the schema after this change was written
    let rows = row_set(
        vec![9, 1],
        vec![Row::upsert(0, 1, values(&[Some("ignored"), Some("erin")]))],
    );

    index
        .create_or_update_or_delete_rows(&rows, &create_test_schema())
        .unwrap();

    let table = index.table(&table_id()).unwrap().unwrap();
    assert_eq!(table.cell(0, 1), Some(&CellValue::String("erin".into())));
}

#[test]
#[timeout(1000)]
fn test_delete_rows() {
    let index = create_test_index();
    let insert = row_set(
        vec![1],
        vec![
            Row::upsert(0, 1, values(&[Some("a")])),
            Row::upsert(1, 1, values(&[Some("b")])),
        ],
    );
    index
        .create_or_update_or_delete_rows(&insert, &create_test_schema())
        .unwrap();

    let delete = row_set(vec![1], vec![Row::deletion(0, 2)]);
    index
        .create_or_update_or_delete_rows(&delete, &create_test_schema())
        .unwrap();

    assert_eq!(index.get_row_count_for_table(&table_id()).unwrap(), Some(1));
    assert!(index.get_row(&table_id(), 0).unwrap().is_none());

    // Deleting a row that is already gone is not an error
    index
        .create_or_update_or_delete_rows(&delete, &create_test_schema())
        .unwrap();
}

#[test]
#[timeout(1000)]
fn test_invalid_batch_leaves_table_unchanged() {
    let index = create_test_index();
    let rows = row_set(
        vec![1, 2],
        vec![
            Row::upsert(0, 1, values(&[Some("fine"), Some("1")])),
            Row::upsert(1, 1, values(&[Some("broken"), Some("not a number")])),
        ],
    );

    let result = index.create_or_update_or_delete_rows(&rows, &create_test_schema());

    assert!(matches!(
        result,
        Err(SyncError::InvalidValue { column: 2, .. })
    ));
    assert_eq!(index.get_row_count_for_table(&table_id()).unwrap(), Some(0));
}

#[test]
#[timeout(1000)]
fn test_string_too_long_rejected() {
    let index = create_test_index();
    let rows = row_set(
        vec![1],
        vec![Row::upsert(0, 1, values(&[Some("a name that is far too long")]))],
    );
    let result = index.create_or_update_or_delete_rows(&rows, &create_test_schema());
    assert!(matches!(result, Err(SyncError::InvalidValue { .. })));
}

#[test]
#[timeout(1000)]
fn test_value_count_mismatch_rejected() {
    let index = create_test_index();
    let rows = row_set(vec![1, 2], vec![Row::upsert(0, 1, values(&[Some("x")]))]);
    let result = index.create_or_update_or_delete_rows(&rows, &create_test_schema());
    assert!(matches!(result, Err(SyncError::InvalidRowSet { .. })));
}

#[test]
#[timeout(1000)]
fn test_rows_for_missing_table() {
    let index = InMemoryTableIndex::new();
    let rows = row_set(vec![1], vec![Row::upsert(0, 1, values(&[Some("x")]))]);
    let result = index.create_or_update_or_delete_rows(&rows, &create_test_schema());
    assert!(matches!(result, Err(SyncError::TableNotFound { .. })));
}

#[test]
#[timeout(1000)]
fn test_schema_change_drops_converts_and_defaults() {
    let index = create_test_index();
    let rows = row_set(
        vec![1, 2, 3],
        vec![Row::upsert(0, 1, values(&[Some("frank"), Some("52"), Some("false")]))],
    );
    index
        .create_or_update_or_delete_rows(&rows, &create_test_schema())
        .unwrap();

    // Drop "active", retype "age" to STRING, add "score" with a default
    let new_schema = vec![
        ColumnModel::new(2, "age", ColumnType::String),
        ColumnModel::new(1, "name", ColumnType::String).with_maximum_size(10),
        ColumnModel::new(4, "score", ColumnType::Double).with_default("1.5"),
    ];
    let changed = index
        .create_or_update_table(&new_schema, &table_id())
        .unwrap();
    assert!(changed);

    let table = index.table(&table_id()).unwrap().unwrap();
    assert_eq!(table.column_ids(), vec![2, 1, 4]);
    assert_eq!(table.cell(0, 2), Some(&CellValue::String("52".into())));
    assert_eq!(table.cell(0, 1), Some(&CellValue::String("frank".into())));
    assert_eq!(table.cell(0, 4), Some(&CellValue::Double(1.5)));
    assert_eq!(table.cell(0, 3), None);
}

#[test]
#[timeout(1000)]
fn test_unconvertible_value_becomes_null() {
    let index = create_test_index();
    let rows = row_set(vec![1], vec![Row::upsert(0, 1, values(&[Some("gina")]))]);
    index
        .create_or_update_or_delete_rows(&rows, &create_test_schema())
        .unwrap();

    let new_schema = vec![ColumnModel::new(1, "name", ColumnType::Integer)];
    index
        .create_or_update_table(&new_schema, &table_id())
        .unwrap();

    let table = index.table(&table_id()).unwrap().unwrap();
    assert_eq!(table.cell(0, 1), Some(&CellValue::Null));
}

#[test]
#[timeout(1000)]
fn test_entity_id_prefix() {
    let schema = vec![ColumnModel::new(1, "ref", ColumnType::EntityId)];
    let index = InMemoryTableIndex::new();
    index.create_or_update_table(&schema, &table_id()).unwrap();
    let rows = row_set(
        vec![1],
        vec![
            Row::upsert(0, 1, values(&[Some("syn77")])),
            Row::upsert(1, 1, values(&[Some("78")])),
        ],
    );

    index.create_or_update_or_delete_rows(&rows, &schema).unwrap();

    let table = index.table(&table_id()).unwrap().unwrap();
    assert_eq!(table.cell(0, 1), Some(&CellValue::Integer(77)));
    assert_eq!(table.cell(1, 1), Some(&CellValue::Integer(78)));
}

#[test]
#[timeout(1000)]
fn test_complete_version_is_monotonic() {
    let index = create_test_index();
    let id = table_id();
    assert_eq!(
        index.get_max_current_complete_version_for_table(&id).unwrap(),
        None
    );

    index.set_max_current_complete_version_for_table(&id, 3).unwrap();
    index.set_max_current_complete_version_for_table(&id, 3).unwrap();
    index.set_max_current_complete_version_for_table(&id, 7).unwrap();
    let result = index.set_max_current_complete_version_for_table(&id, 5);

    assert!(matches!(result, Err(SyncError::ConflictingUpdate(_))));
    assert_eq!(
        index.get_max_current_complete_version_for_table(&id).unwrap(),
        Some(7)
    );
}

#[test]
#[timeout(1000)]
fn test_delete_table_and_status_table() {
    let index = create_test_index();
    let id = table_id();
    index.set_max_current_complete_version_for_table(&id, 4).unwrap();

    assert!(index.delete_table(&id).unwrap());
    assert!(!index.delete_table(&id).unwrap());
    assert_eq!(index.get_row_count_for_table(&id).unwrap(), None);
    assert_eq!(index.get_current_table_columns(&id).unwrap(), None);

    index.delete_status_table(&id).unwrap();
    index.delete_status_table(&id).unwrap();
    assert_eq!(
        index.get_max_current_complete_version_for_table(&id).unwrap(),
        None
    );
}

#[test]
#[timeout(1000)]
fn test_snapshot_restores_tables_and_versions() {
    let index = create_test_index();
    let rows = row_set(vec![1], vec![Row::upsert(3, 2, values(&[Some("hank")]))]);
    index
        .create_or_update_or_delete_rows(&rows, &create_test_schema())
        .unwrap();
    index
        .set_max_current_complete_version_for_table(&table_id(), 2)
        .unwrap();

    let restored = InMemoryTableIndex::from_snapshot(index.snapshot().unwrap());

    assert_eq!(restored.table_ids().unwrap(), vec![table_id()]);
    assert_eq!(
        restored.get_row(&table_id(), 3).unwrap(),
        index.get_row(&table_id(), 3).unwrap()
    );
    assert_eq!(
        restored
            .get_max_current_complete_version_for_table(&table_id())
            .unwrap(),
        Some(2)
    );
}

#[test]
#[timeout(5000)]
fn test_concurrent_readers_see_whole_batches() {
    use std::sync::Arc;
    use std::thread;

    let index = Arc::new(create_test_index());
    let schema = create_test_schema();

    let writer = {
        let index = index.clone();
        let schema = schema.clone();
        thread::spawn(move || {
            for version in 0..50u64 {
                let rows = (0..20)
                    .map(|row_id| Row::upsert(row_id, version, values(&[Some("w")])))
                    .collect();
                index
                    .create_or_update_or_delete_rows(&row_set(vec![1], rows), &schema)
                    .unwrap();
            }
        })
    };

    for _ in 0..200 {
        let table = index.table(&table_id()).unwrap().unwrap();
        let versions: std::collections::BTreeSet<u64> =
            table.rows.values().map(|r| r.version_number).collect();
        assert!(versions.len() <= 1, "observed a partial batch: {:?}", versions);
    }

    writer.join().unwrap();
    assert_eq!(index.get_row_count_for_table(&table_id()).unwrap(), Some(20));
}
