//! Sortable store contract and SQLite implementation.
//!
//! # Responsibility
//! - Define the narrow persistence contract the ordering core depends on.
//! - Map that contract onto a configurable SQLite table.
//! - Own transaction demarcation for multi-row rank writes.
//!
//! # Invariants
//! - Partition loads are deterministic: `order ASC, id ASC`.
//! - Rank writes inside `in_transaction` commit together or not at all.
//! - Table/column names come from a validated `SortableConfig` only.

use crate::config::{ConfigError, SortableConfig};
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::order_key::Rank;
use crate::model::record::{PartitionKey, RecordId, Sortable, SortableRecord};
use crate::ordering::ordered_set::RankChanges;
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const NOW_MS_SQL: &str = "(CAST(strftime('%s', 'now') AS INTEGER) * 1000)";
const NESTED_SAVEPOINT: &str = "sortable_core_op";

/// Result type used by sortable store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Identifier type of a sortable record type.
pub type RecordIdOf<R> = <R as Sortable>::Id;

/// Identifier type of a store's records.
pub type StoreRecordId<S> = RecordIdOf<<S as SortableStore>::Record>;

/// Errors from sortable store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Configuration rejected before any SQL was built.
    Config(ConfigError),
    /// No row with this id (or no row in the expected tombstone state).
    RecordNotFound(String),
    /// Grouped partition requested but no partition column is configured.
    PartitioningDisabled,
    /// Bundled table requested but the connection is not at the migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(String),
    /// Required column is missing from expected table.
    MissingRequiredColumn { table: String, column: String },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::RecordNotFound(id) => write!(f, "sortable record not found: {id}"),
            Self::PartitioningDisabled => {
                write!(f, "grouped partition requested but no partition column is configured")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "sortable store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "sortable store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "sortable store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid sortable data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Persistence contract consumed by the sortable service.
pub trait SortableStore {
    /// Record type persisted by this store.
    type Record: Sortable;

    /// Loads one record by id.
    fn find(
        &self,
        id: RecordIdOf<Self::Record>,
        include_deleted: bool,
    ) -> StoreResult<Option<Self::Record>>;
    /// Loads a partition ordered by rank, then id.
    fn load_partition(
        &self,
        partition: &PartitionKey,
        include_deleted: bool,
    ) -> StoreResult<Vec<Self::Record>>;
    /// Persists a new active record at `rank`.
    fn insert(
        &self,
        id: RecordIdOf<Self::Record>,
        partition: &PartitionKey,
        rank: Rank,
    ) -> StoreResult<Self::Record>;
    /// Writes new ranks; fails if any referenced record is missing.
    fn update_ranks(&self, changes: &RankChanges<RecordIdOf<Self::Record>>) -> StoreResult<()>;
    /// Sets the tombstone of an active record.
    fn mark_deleted(&self, id: RecordIdOf<Self::Record>) -> StoreResult<()>;
    /// Clears the tombstone of a deleted record.
    fn mark_restored(&self, id: RecordIdOf<Self::Record>) -> StoreResult<()>;
    /// Runs `work` inside one transaction; commits on `Ok`, rolls back on `Err`.
    fn in_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StoreError>;
}

/// SQL text derived once from a validated config.
#[derive(Debug, Clone)]
struct Statements {
    select_by_id: String,
    select_partition: String,
    insert: String,
    update_rank: String,
    mark_deleted: String,
    mark_restored: String,
}

impl Statements {
    fn build(config: &SortableConfig) -> Self {
        let table = config.table.as_str();
        let id = config.id_column.as_str();
        let order = config.order_column.as_str();
        let deleted_at = config.deleted_at_column.as_str();
        let partition_expr = config.partition_column.as_deref().unwrap_or("NULL");
        let touch = config
            .timestamp_column()
            .map(|column| format!(", {column} = {NOW_MS_SQL}"))
            .unwrap_or_default();

        let select = format!(
            "SELECT
                {id} AS record_id,
                {partition_expr} AS record_partition,
                {order} AS record_rank,
                {deleted_at} AS record_deleted_at
             FROM {table}"
        );
        let insert = match config.partition_column.as_deref() {
            Some(partition) => {
                format!("INSERT INTO {table} ({id}, {partition}, {order}) VALUES (?1, ?2, ?3);")
            }
            None => format!("INSERT INTO {table} ({id}, {order}) VALUES (?1, ?3);"),
        };

        Self {
            select_by_id: format!(
                "{select}
                 WHERE {id} = ?1
                   AND (?2 = 1 OR {deleted_at} IS NULL);"
            ),
            select_partition: format!(
                "{select}
                 WHERE {partition_expr} IS ?1
                   AND (?2 = 1 OR {deleted_at} IS NULL)
                 ORDER BY {order} ASC, {id} ASC;"
            ),
            insert,
            update_rank: format!("UPDATE {table} SET {order} = ?2{touch} WHERE {id} = ?1;"),
            mark_deleted: format!(
                "UPDATE {table}
                 SET {deleted_at} = {NOW_MS_SQL}{touch}
                 WHERE {id} = ?1
                   AND {deleted_at} IS NULL;"
            ),
            mark_restored: format!(
                "UPDATE {table}
                 SET {deleted_at} = NULL{touch}
                 WHERE {id} = ?1
                   AND {deleted_at} IS NOT NULL;"
            ),
        }
    }
}

/// SQLite-backed sortable store.
pub struct SqliteSortableStore<'conn> {
    conn: &'conn Connection,
    config: SortableConfig,
    statements: Statements,
}

impl<'conn> SqliteSortableStore<'conn> {
    /// Creates a store over the default `sortable_items` table.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        Self::with_config(conn, SortableConfig::default())
    }

    /// Creates a store bound to the table described by `config`.
    ///
    /// # Errors
    /// - `Config` when identifiers or bounds are invalid.
    /// - `UninitializedConnection` when the bundled `sortable_items` table is
    ///   used and migrations were not applied.
    /// - `MissingRequiredTable` / `MissingRequiredColumn` for schema gaps.
    pub fn with_config(conn: &'conn Connection, config: SortableConfig) -> StoreResult<Self> {
        config.validate()?;
        ensure_store_connection_ready(conn, &config)?;
        let statements = Statements::build(&config);
        Ok(Self {
            conn,
            config,
            statements,
        })
    }

    pub fn config(&self) -> &SortableConfig {
        &self.config
    }

    fn partition_param(&self, partition: &PartitionKey) -> StoreResult<Value> {
        match (partition.as_column_value(), self.config.partition_column.is_some()) {
            (None, _) => Ok(Value::Null),
            (Some(value), true) => Ok(Value::Text(value.to_string())),
            (Some(_), false) => Err(StoreError::PartitioningDisabled),
        }
    }
}

impl SortableStore for SqliteSortableStore<'_> {
    type Record = SortableRecord;

    fn find(&self, id: RecordId, include_deleted: bool) -> StoreResult<Option<SortableRecord>> {
        let mut stmt = self.conn.prepare(&self.statements.select_by_id)?;
        let mut rows = stmt.query(params_from_iter([
            Value::Text(id.to_string()),
            Value::Integer(i64::from(include_deleted)),
        ]))?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?));
        }
        Ok(None)
    }

    fn load_partition(
        &self,
        partition: &PartitionKey,
        include_deleted: bool,
    ) -> StoreResult<Vec<SortableRecord>> {
        let partition_value = self.partition_param(partition)?;
        let mut stmt = self.conn.prepare(&self.statements.select_partition)?;
        let mut rows = stmt.query(params_from_iter([
            partition_value,
            Value::Integer(i64::from(include_deleted)),
        ]))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn insert(
        &self,
        id: RecordId,
        partition: &PartitionKey,
        rank: Rank,
    ) -> StoreResult<SortableRecord> {
        let partition_value = self.partition_param(partition)?;
        let bind_values = match self.config.partition_column {
            Some(_) => vec![
                Value::Text(id.to_string()),
                partition_value,
                Value::Integer(rank.get()),
            ],
            // ?2 is unused by the unpartitioned INSERT but keeps numbering stable.
            None => vec![
                Value::Text(id.to_string()),
                Value::Null,
                Value::Integer(rank.get()),
            ],
        };
        self.conn
            .execute(&self.statements.insert, params_from_iter(bind_values))?;
        self.find(id, false)?
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))
    }

    fn update_ranks(&self, changes: &RankChanges<RecordId>) -> StoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut stmt = self.conn.prepare(&self.statements.update_rank)?;
        for (id, rank) in changes.iter() {
            let changed = stmt.execute(params_from_iter([
                Value::Text(id.to_string()),
                Value::Integer(rank.get()),
            ]))?;
            if changed == 0 {
                return Err(StoreError::RecordNotFound(id.to_string()));
            }
        }
        debug!(
            "event=rank_write module=repo status=ok table={} rows={}",
            self.config.table,
            changes.len()
        );
        Ok(())
    }

    fn mark_deleted(&self, id: RecordId) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(&self.statements.mark_deleted, [id.to_string()])?;
        if changed == 0 {
            return Err(StoreError::RecordNotFound(id.to_string()));
        }
        Ok(())
    }

    fn mark_restored(&self, id: RecordId) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(&self.statements.mark_restored, [id.to_string()])?;
        if changed == 0 {
            return Err(StoreError::RecordNotFound(id.to_string()));
        }
        Ok(())
    }

    fn in_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StoreError>,
    {
        // A caller-owned transaction is already open: scope the work with a savepoint.
        if !self.conn.is_autocommit() {
            return run_in_savepoint(self.conn, work);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        match work() {
            Ok(value) => {
                tx.commit().map_err(StoreError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        "event=tx_rollback module=repo status=error error={}",
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }
}

fn run_in_savepoint<T, E, F>(conn: &Connection, work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<StoreError>,
{
    conn.execute_batch(&format!("SAVEPOINT {NESTED_SAVEPOINT};"))
        .map_err(StoreError::from)?;
    match work() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {NESTED_SAVEPOINT};"))
                .map_err(StoreError::from)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = conn.execute_batch(&format!(
                "ROLLBACK TO {NESTED_SAVEPOINT}; RELEASE {NESTED_SAVEPOINT};"
            )) {
                warn!(
                    "event=savepoint_rollback module=repo status=error error={}",
                    rollback_err
                );
            }
            Err(err)
        }
    }
}

fn parse_record_row(row: &Row<'_>) -> StoreResult<SortableRecord> {
    let id_text: String = row.get("record_id")?;
    let id = Uuid::parse_str(&id_text)
        .map_err(|_| StoreError::InvalidData(format!("invalid record id `{id_text}`")))?;

    let raw_rank: i64 = row.get("record_rank")?;
    let rank = Rank::new(raw_rank)
        .map_err(|err| StoreError::InvalidData(format!("record {id}: {err}")))?;

    let partition_value = match row.get::<_, Value>("record_partition")? {
        Value::Null => None,
        Value::Text(value) => Some(value),
        Value::Integer(value) => Some(value.to_string()),
        other => {
            return Err(StoreError::InvalidData(format!(
                "record {id}: unsupported partition value {other:?}"
            )));
        }
    };
    let partition_key = PartitionKey::from_column_value(partition_value);

    Ok(SortableRecord {
        id,
        partition_key,
        rank,
        deleted_at: row.get("record_deleted_at")?,
    })
}

fn ensure_store_connection_ready(conn: &Connection, config: &SortableConfig) -> StoreResult<()> {
    // Host-owned tables follow the host's own migrations and `user_version`.
    if config.uses_bundled_table() {
        let expected_version = latest_version();
        let actual_version: u32 =
            conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if actual_version != expected_version {
            return Err(StoreError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
    }

    if !table_exists(conn, &config.table)? {
        return Err(StoreError::MissingRequiredTable(config.table.clone()));
    }

    let mut columns = vec![
        config.id_column.as_str(),
        config.order_column.as_str(),
        config.deleted_at_column.as_str(),
    ];
    columns.extend(config.partition_column.as_deref());
    columns.extend(config.timestamp_column());
    for column in columns {
        if !table_has_column(conn, &config.table, column)? {
            return Err(StoreError::MissingRequiredColumn {
                table: config.table.clone(),
                column: column.to_string(),
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = 'table' AND name = ?1;",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
