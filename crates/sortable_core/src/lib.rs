//! Ordering maintenance for persisted, soft-deletable records.
//! Ranks stay unique and gap-tolerant across insert, move, delete and restore.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod ordering;
pub mod repo;
pub mod service;

pub use config::{ConfigError, RestoreConflictPolicy, SortableConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::order_key::{NegativeRankError, Rank};
pub use model::record::{PartitionKey, RecordId, RecordState, Sortable, SortableRecord};
pub use ordering::ordered_set::{OrderedSet, OrderedSetError, OrderedSetResult, RankChanges};
pub use ordering::soft_delete_filter::{SoftDeleteFilter, SoftDeletePolicy};
pub use repo::sortable_repo::{
    RecordIdOf, SortableStore, SqliteSortableStore, StoreError, StoreRecordId, StoreResult,
};
pub use service::sortable_service::{
    SortDirection, SortableError, SortableResult, SortableService,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
