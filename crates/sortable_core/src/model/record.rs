//! Sortable record model.
//!
//! # Responsibility
//! - Define the capability set a record must expose to take part in ordering.
//! - Provide the concrete record shape persisted by the SQLite store.
//!
//! # Invariants
//! - `id` is stable and never reused for another record.
//! - `deleted_at` is the source of truth for tombstone state.
//! - A record belongs to exactly one partition.

use crate::model::order_key::Rank;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use uuid::Uuid;

/// Stable identifier of a sortable record.
pub type RecordId = Uuid;

/// Group of records ordered independently from other groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKey {
    /// Unpartitioned ordering (or rows with a NULL partition column).
    Global,
    /// Records sharing one partition column value.
    Group(String),
}

impl PartitionKey {
    /// Builds a grouped partition key.
    pub fn group(value: impl Into<String>) -> Self {
        Self::Group(value.into())
    }

    /// Column value for this key; `None` for the global partition.
    pub fn as_column_value(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Group(value) => Some(value.as_str()),
        }
    }

    /// Inverse of [`PartitionKey::as_column_value`].
    pub fn from_column_value(value: Option<String>) -> Self {
        match value {
            Some(value) => Self::Group(value),
            None => Self::Global,
        }
    }
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "<global>"),
            Self::Group(value) => write!(f, "{value}"),
        }
    }
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Active,
    Deleted,
}

impl Display for RecordState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Capabilities a record type exposes to the ordering core.
///
/// Any persisted type with an id, a rank, a partition and a tombstone marker
/// can be ordered; the core never needs to know the rest of its shape.
pub trait Sortable: Clone + Debug {
    /// Identifier type; must be cheap to copy and usable as a map key.
    type Id: Copy + Eq + Hash + Ord + Debug + Display;

    fn id(&self) -> Self::Id;
    fn rank(&self) -> Rank;
    fn partition_key(&self) -> &PartitionKey;
    /// Epoch ms tombstone marker; `None` means active.
    fn deleted_at(&self) -> Option<i64>;

    fn state(&self) -> RecordState {
        if self.deleted_at().is_some() {
            RecordState::Deleted
        } else {
            RecordState::Active
        }
    }

    fn is_deleted(&self) -> bool {
        self.state() == RecordState::Deleted
    }
}

/// Record shape stored by [`crate::repo::sortable_repo::SqliteSortableStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortableRecord {
    pub id: RecordId,
    pub partition_key: PartitionKey,
    pub rank: Rank,
    pub deleted_at: Option<i64>,
}

impl SortableRecord {
    /// Creates an active record.
    pub fn new(id: RecordId, partition_key: PartitionKey, rank: Rank) -> Self {
        Self {
            id,
            partition_key,
            rank,
            deleted_at: None,
        }
    }
}

impl Sortable for SortableRecord {
    type Id = RecordId;

    fn id(&self) -> Self::Id {
        self.id
    }

    fn rank(&self) -> Rank {
        self.rank
    }

    fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    fn deleted_at(&self) -> Option<i64> {
        self.deleted_at
    }
}
