use rusqlite::{params, Connection};
use sortable_core::db::open_db_in_memory;
use sortable_core::{
    ConfigError, PartitionKey, Rank, RankChanges, SortableConfig, SortableError,
    SortableRecord, SortableService, SortableStore, SqliteSortableStore, StoreError,
};
use std::io::Write;
use uuid::Uuid;

const DUMMIES_TABLE: &str = "CREATE TABLE dummies (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NULL,
    custom_column_sort INTEGER NOT NULL DEFAULT 0,
    deleted_at INTEGER NULL
);";

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn dummies_config() -> SortableConfig {
    let mut config = SortableConfig::for_table("dummies").without_timestamps();
    config.order_column = "custom_column_sort".to_string();
    config
}

#[test]
fn try_new_requires_migrated_connection() {
    let conn = Connection::open_in_memory().unwrap();

    match SqliteSortableStore::try_new(&conn) {
        Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        }) => {
            assert_eq!(expected_version, 1);
            assert_eq!(actual_version, 0);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("unmigrated connection must be rejected"),
    }
}

#[test]
fn host_table_binds_regardless_of_host_schema_version() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(DUMMIES_TABLE).unwrap();
    conn.execute_batch("PRAGMA user_version = 7;").unwrap();

    let store = SqliteSortableStore::with_config(&conn, dummies_config()).unwrap();
    let service = SortableService::from_config(store, &dummies_config());
    let first = service.append(Uuid::new_v4(), PartitionKey::Global).unwrap();
    let second = service.append(Uuid::new_v4(), PartitionKey::Global).unwrap();

    assert_eq!((first.rank.get(), second.rank.get()), (1, 2));
    let version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, 7);
}

#[test]
fn with_config_reports_missing_table_and_column() {
    let conn = setup();

    let err = SqliteSortableStore::with_config(&conn, dummies_config())
        .err()
        .expect("missing table must be rejected");
    assert!(matches!(err, StoreError::MissingRequiredTable(table) if table == "dummies"));

    conn.execute_batch(DUMMIES_TABLE).unwrap();
    let mut config = dummies_config();
    config.ignore_timestamps = false;
    let err = SqliteSortableStore::with_config(&conn, config)
        .err()
        .expect("missing updated_at must be rejected");
    assert!(matches!(
        err,
        StoreError::MissingRequiredColumn { table, column }
            if table == "dummies" && column == "updated_at"
    ));
}

#[test]
fn with_config_rejects_invalid_identifiers() {
    let conn = setup();
    let config = SortableConfig::for_table("sortable_items; DROP TABLE x");

    let err = SqliteSortableStore::with_config(&conn, config)
        .err()
        .expect("invalid identifier must be rejected");
    assert!(matches!(err, StoreError::Config(ConfigError::Invalid(_))));
}

#[test]
fn custom_table_loaded_from_toml_file() {
    let conn = setup();
    conn.execute_batch(DUMMIES_TABLE).unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        table = "dummies"
        order_column = "custom_column_sort"
        ignore_timestamps = true
        "#
    )
    .unwrap();
    let config = SortableConfig::from_file(file.path()).unwrap();
    assert_eq!(config, dummies_config());

    let store = SqliteSortableStore::with_config(&conn, config.clone()).unwrap();
    let service = SortableService::from_config(store, &config);
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        service.append(*id, PartitionKey::Global).unwrap();
    }

    service.delete(ids[0]).unwrap();
    service.move_to_rank(ids[2], 1).unwrap();
    let restored = service.restore(ids[0]).unwrap();

    let mut stmt = conn
        .prepare(
            "SELECT id, custom_column_sort FROM dummies
             WHERE deleted_at IS NULL
             ORDER BY custom_column_sort ASC;",
        )
        .unwrap();
    let rows: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    // ids[2] took rank 1 from the tombstoned ids[0], which lands right after it.
    assert_eq!(restored.get(), 2);
    assert_eq!(
        rows,
        vec![
            (ids[2].to_string(), 1),
            (ids[0].to_string(), 2),
            (ids[1].to_string(), 3),
        ]
    );
}

#[test]
fn config_file_errors_are_reported() {
    let dir = tempfile::tempdir().unwrap();

    let err = SortableConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));

    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "table = ").unwrap();
    let err = SortableConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}

#[test]
fn rank_writes_touch_updated_at_unless_ignored() {
    let conn = setup();
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO sortable_items (id, order_column, updated_at) VALUES (?1, 1, 0);",
        [id.to_string()],
    )
    .unwrap();
    let mut changes = RankChanges::new();
    changes.push(id, Rank::new(5).unwrap());

    let quiet = SqliteSortableStore::with_config(&conn, SortableConfig::default().without_timestamps())
        .unwrap();
    quiet.update_ranks(&changes).unwrap();
    assert_eq!(updated_at(&conn, id), 0);

    let store = SqliteSortableStore::try_new(&conn).unwrap();
    store.update_ranks(&changes).unwrap();
    assert!(updated_at(&conn, id) > 0);
    assert_eq!(store.find(id, false).unwrap().unwrap().rank.get(), 5);
}

#[test]
fn load_partition_breaks_rank_ties_by_id() {
    let conn = setup();
    let low = Uuid::from_u128(1);
    let high = Uuid::from_u128(2);
    for id in [high, low] {
        conn.execute(
            "INSERT INTO sortable_items (id, order_column, deleted_at) VALUES (?1, 3, ?2);",
            params![id.to_string(), 1_i64],
        )
        .unwrap();
    }
    let store = SqliteSortableStore::try_new(&conn).unwrap();

    let all = store.load_partition(&PartitionKey::Global, true).unwrap();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![low, high]);
    assert!(store
        .load_partition(&PartitionKey::Global, false)
        .unwrap()
        .is_empty());
}

#[test]
fn write_paths_report_missing_records() {
    let conn = setup();
    let store = SqliteSortableStore::try_new(&conn).unwrap();
    let ghost = Uuid::new_v4();

    let mut changes = RankChanges::new();
    changes.push(ghost, Rank::FIRST);
    assert!(matches!(
        store.update_ranks(&changes),
        Err(StoreError::RecordNotFound(id)) if id == ghost.to_string()
    ));

    let record = store.insert(Uuid::new_v4(), &PartitionKey::Global, Rank::FIRST).unwrap();
    assert!(matches!(
        store.mark_restored(record.id),
        Err(StoreError::RecordNotFound(_))
    ));
    store.mark_deleted(record.id).unwrap();
    assert!(matches!(
        store.mark_deleted(record.id),
        Err(StoreError::RecordNotFound(_))
    ));
    assert!(store.find(record.id, true).unwrap().unwrap().deleted_at.is_some());
}

#[test]
fn malformed_rows_surface_as_invalid_data() {
    let conn = setup();
    conn.execute(
        "INSERT INTO sortable_items (id, order_column) VALUES ('not-a-uuid', 1);",
        [],
    )
    .unwrap();
    let service = SortableService::new(SqliteSortableStore::try_new(&conn).unwrap());

    let err = service.renumber(&PartitionKey::Global).unwrap_err();
    assert!(matches!(err, SortableError::Store(StoreError::InvalidData(_))));
}

#[test]
fn record_serializes_rank_as_integer() {
    let record = SortableRecord::new(Uuid::nil(), PartitionKey::group("inbox"), Rank::new(4).unwrap());

    let value = serde_json::to_value(&record).unwrap();

    assert_eq!(value["rank"], 4);
    assert_eq!(value["partition_key"]["group"], "inbox");
    assert!(value["deleted_at"].is_null());
    let decoded: SortableRecord = serde_json::from_value(value).unwrap();
    assert_eq!(decoded, record);
}

fn updated_at(conn: &Connection, id: Uuid) -> i64 {
    conn.query_row(
        "SELECT updated_at FROM sortable_items WHERE id = ?1;",
        [id.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}
