//! Sortable ordering use-case service.
//!
//! # Responsibility
//! - Expose append/move/delete/restore/renumber operations over one store.
//! - Compute rank changes with `OrderedSet` and persist them transactionally.
//! - Apply soft-delete visibility and restore-conflict policies.
//!
//! # Invariants
//! - Every mutating operation runs inside one `in_transaction` call; a failure
//!   at any step leaves no partial rank updates behind.
//! - Only records whose rank actually changed are written.
//! - Active ranks within a partition stay unique after every operation.
//! - Record lifecycle is `active -> deleted -> active`; any other transition
//!   fails with `InvalidTransition`.

use crate::config::{RestoreConflictPolicy, SortableConfig};
use crate::model::order_key::Rank;
use crate::model::record::{PartitionKey, RecordId, RecordState, Sortable};
use crate::ordering::ordered_set::{OrderedSet, OrderedSetError, RankChanges};
use crate::ordering::soft_delete_filter::SoftDeleteFilter;
use crate::repo::sortable_repo::{SortableStore, StoreError, StoreRecordId};
use log::{info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::time::Instant;

/// Result type used by sortable service operations.
pub type SortableResult<T, Id = RecordId> = Result<T, SortableError<Id>>;

/// Iteration direction of [`SortableService::ordered`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Errors from sortable service operations.
#[derive(Debug)]
pub enum SortableError<Id = RecordId> {
    /// Record does not exist, is not orderable, or lives in another partition.
    NotFound(Id),
    /// Requested rank is outside `1..=len` of the partition.
    OutOfRange { rank: i64, len: usize },
    /// Restored record's prior rank is held by an active record.
    Conflict { id: Id, holder: Id, rank: Rank },
    /// Lifecycle transition not allowed from the record's current state.
    InvalidTransition {
        id: Id,
        state: RecordState,
        action: &'static str,
    },
    /// Record already exists, or an explicit order lists it twice.
    Duplicate(Id),
    /// Store-level failure.
    Store(StoreError),
}

impl<Id: Display> Display for SortableError<Id> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "sortable record not found: {id}"),
            Self::OutOfRange { rank, len } => {
                write!(f, "rank {rank} out of range for partition of {len} records")
            }
            Self::Conflict { id, holder, rank } => write!(
                f,
                "cannot restore {id}: rank {rank} is held by active record {holder}"
            ),
            Self::InvalidTransition { id, state, action } => {
                write!(f, "cannot {action} record {id} in state {state}")
            }
            Self::Duplicate(id) => write!(f, "duplicate sortable record: {id}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl<Id: Debug + Display> Error for SortableError<Id> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl<Id> From<StoreError> for SortableError<Id> {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl<Id> From<OrderedSetError<Id>> for SortableError<Id> {
    fn from(value: OrderedSetError<Id>) -> Self {
        match value {
            OrderedSetError::MissingRecord(id) => Self::NotFound(id),
            OrderedSetError::IndexOutOfRange { index, len } => Self::OutOfRange {
                rank: i64::try_from(index).map_or(i64::MAX, |index| index.saturating_add(1)),
                len,
            },
            OrderedSetError::DuplicateRecord(id) => Self::Duplicate(id),
        }
    }
}

/// Maps a single-record store miss onto the caller-facing `NotFound`.
fn scoped_to<Id: Copy>(id: Id) -> impl FnOnce(StoreError) -> SortableError<Id> {
    move |err| match err {
        StoreError::RecordNotFound(_) => SortableError::NotFound(id),
        other => SortableError::Store(other),
    }
}

/// Sortable ordering service facade.
pub struct SortableService<S: SortableStore> {
    store: S,
    filter: SoftDeleteFilter,
    start_rank: Rank,
    restore_conflict: RestoreConflictPolicy,
}

impl<S: SortableStore> SortableService<S> {
    /// Creates service with default policies.
    pub fn new(store: S) -> Self {
        Self {
            store,
            filter: SoftDeleteFilter::default(),
            start_rank: Rank::FIRST,
            restore_conflict: RestoreConflictPolicy::default(),
        }
    }

    /// Creates service with policies taken from `config`.
    pub fn from_config(store: S, config: &SortableConfig) -> Self {
        Self {
            store,
            filter: SoftDeleteFilter::new(config.soft_delete_policy),
            start_rank: config.start_rank(),
            restore_conflict: config.restore_conflict,
        }
    }

    /// Replaces the soft-delete filter.
    pub fn with_filter(mut self, filter: SoftDeleteFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Replaces the restore-conflict policy.
    pub fn with_restore_conflict(mut self, policy: RestoreConflictPolicy) -> Self {
        self.restore_conflict = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn filter(&self) -> &SoftDeleteFilter {
        &self.filter
    }

    /// Creates one active record at the end of `partition`.
    ///
    /// The new rank is one past the highest rank in the partition,
    /// tombstones included.
    pub fn append(
        &self,
        id: StoreRecordId<S>,
        partition: PartitionKey,
    ) -> SortableResult<S::Record, StoreRecordId<S>> {
        self.mutate("append", || {
            if self.store.find(id, true)?.is_some() {
                return Err(SortableError::Duplicate(id));
            }
            let set = self.load_set(&partition)?;
            let rank = set.next_rank();
            let record = self.store.insert(id, &partition, rank)?;
            Ok(record)
        })
    }

    /// Moves `id` to `target`'s slot, shifting `target` and followers down.
    pub fn insert_before(
        &self,
        id: StoreRecordId<S>,
        target: StoreRecordId<S>,
    ) -> SortableResult<Rank, StoreRecordId<S>> {
        self.mutate("insert_before", || {
            let (record, mut set) = self.member_set(id)?;
            let changes = set.insert_before(record, target)?;
            self.persist(&changes)?;
            Ok(current_rank(&set, id))
        })
    }

    /// Moves `id` directly after `target`.
    pub fn insert_after(
        &self,
        id: StoreRecordId<S>,
        target: StoreRecordId<S>,
    ) -> SortableResult<Rank, StoreRecordId<S>> {
        self.mutate("insert_after", || {
            let (record, mut set) = self.member_set(id)?;
            let changes = set.insert_after(record, target)?;
            self.persist(&changes)?;
            Ok(current_rank(&set, id))
        })
    }

    /// Moves `id` to the 1-based position `target_rank` and densifies the
    /// partition from the start rank.
    ///
    /// `len` is the number of orderable records in the partition. It equals
    /// [`Self::active_count`] unless the partition's soft-delete policy is
    /// `IncludeDeleted`, in which case tombstones count as positions too.
    ///
    /// # Errors
    /// - `OutOfRange` unless `1 <= target_rank <= len`.
    pub fn move_to_rank(
        &self,
        id: StoreRecordId<S>,
        target_rank: i64,
    ) -> SortableResult<Rank, StoreRecordId<S>> {
        self.mutate("move_to_rank", || {
            let (_, mut set) = self.member_set(id)?;
            let len = set.len();
            let index = target_rank
                .checked_sub(1)
                .and_then(|index| usize::try_from(index).ok())
                .filter(|index| *index < len)
                .ok_or(SortableError::OutOfRange {
                    rank: target_rank,
                    len,
                })?;
            let changes = set.move_to_index(id, index)?;
            self.persist(&changes)?;
            Ok(current_rank(&set, id))
        })
    }

    /// Swaps `id` with its predecessor.
    pub fn move_up(&self, id: StoreRecordId<S>) -> SortableResult<Rank, StoreRecordId<S>> {
        self.move_with("move_up", id, OrderedSet::move_up)
    }

    /// Swaps `id` with its successor.
    pub fn move_down(&self, id: StoreRecordId<S>) -> SortableResult<Rank, StoreRecordId<S>> {
        self.move_with("move_down", id, OrderedSet::move_down)
    }

    pub fn move_to_start(&self, id: StoreRecordId<S>) -> SortableResult<Rank, StoreRecordId<S>> {
        self.move_with("move_to_start", id, OrderedSet::move_to_start)
    }

    pub fn move_to_end(&self, id: StoreRecordId<S>) -> SortableResult<Rank, StoreRecordId<S>> {
        self.move_with("move_to_end", id, OrderedSet::move_to_end)
    }

    /// Exchanges the ranks of two records of one partition.
    pub fn swap(
        &self,
        a: StoreRecordId<S>,
        b: StoreRecordId<S>,
    ) -> SortableResult<(), StoreRecordId<S>> {
        self.mutate("swap", || {
            let (_, mut set) = self.member_set(a)?;
            let changes = set.swap(a, b)?;
            self.persist(&changes)
        })
    }

    /// Assigns `start_rank..` to `ids` in the given order; remaining orderable
    /// records follow in their current order.
    ///
    /// Tombstoned records of the partition may be listed.
    pub fn set_new_order(
        &self,
        partition: &PartitionKey,
        ids: &[StoreRecordId<S>],
        start_rank: Option<Rank>,
    ) -> SortableResult<RankChanges<StoreRecordId<S>>, StoreRecordId<S>> {
        self.mutate("set_new_order", || {
            let records = self.store.load_partition(partition, true)?;
            let mut by_id: HashMap<_, _> = records
                .iter()
                .map(|record| (record.id(), record.clone()))
                .collect();
            let mut listed = Vec::with_capacity(ids.len());
            for id in ids {
                match by_id.remove(id) {
                    Some(record) => listed.push(record),
                    None if listed.iter().any(|record: &S::Record| record.id() == *id) => {
                        return Err(SortableError::Duplicate(*id));
                    }
                    None => return Err(SortableError::NotFound(*id)),
                }
            }

            let mut set = OrderedSet::from_records(
                partition.clone(),
                records,
                &self.filter,
                start_rank.unwrap_or(self.start_rank),
            );
            let changes = set.reorder(listed)?;
            self.persist(&changes)?;
            Ok(changes)
        })
    }

    /// Tombstones `id`; ranks of other records are untouched.
    pub fn delete(&self, id: StoreRecordId<S>) -> SortableResult<(), StoreRecordId<S>> {
        self.mutate("delete", || {
            let record = self.require(id)?;
            if record.is_deleted() {
                return Err(SortableError::InvalidTransition {
                    id,
                    state: record.state(),
                    action: "delete",
                });
            }
            self.store.mark_deleted(id).map_err(scoped_to(id))
        })
    }

    /// Clears the tombstone of `id` and returns its rank.
    ///
    /// The prior rank is kept unless an active record holds it; then the
    /// restore conflict policy decides between repositioning right after the
    /// holder and failing with `Conflict`.
    pub fn restore(&self, id: StoreRecordId<S>) -> SortableResult<Rank, StoreRecordId<S>> {
        self.mutate("restore", || {
            let record = self.require(id)?;
            if !record.is_deleted() {
                return Err(SortableError::InvalidTransition {
                    id,
                    state: record.state(),
                    action: "restore",
                });
            }
            self.store.mark_restored(id).map_err(scoped_to(id))?;

            let restored = self.require(id)?;
            let mut set = self.load_set(restored.partition_key())?;
            let holder = set
                .active_holder(restored.rank(), id)
                .map(Sortable::id);
            let Some(holder) = holder else {
                return Ok(restored.rank());
            };

            match self.restore_conflict {
                RestoreConflictPolicy::Reject => Err(SortableError::Conflict {
                    id,
                    holder,
                    rank: restored.rank(),
                }),
                RestoreConflictPolicy::Reposition => {
                    let changes = set.insert_after(restored, holder)?;
                    self.persist(&changes)?;
                    Ok(current_rank(&set, id))
                }
            }
        })
    }

    /// Compacts orderable records of `partition` to `start_rank..`.
    pub fn renumber(
        &self,
        partition: &PartitionKey,
    ) -> SortableResult<RankChanges<StoreRecordId<S>>, StoreRecordId<S>> {
        self.mutate("renumber", || {
            let mut set = self.load_set(partition)?;
            let changes = set.renumber();
            self.persist(&changes)?;
            Ok(changes)
        })
    }

    /// Orderable records of `partition` in rank order.
    pub fn ordered(
        &self,
        partition: &PartitionKey,
        direction: SortDirection,
    ) -> SortableResult<Vec<S::Record>, StoreRecordId<S>> {
        let set = self.load_set(partition)?;
        let records = set.iter().map(|(record, _)| record.clone());
        Ok(match direction {
            SortDirection::Ascending => records.collect(),
            SortDirection::Descending => records.rev().collect(),
        })
    }

    /// Loads one active record.
    pub fn get(
        &self,
        id: StoreRecordId<S>,
    ) -> SortableResult<Option<S::Record>, StoreRecordId<S>> {
        self.store.find(id, false).map_err(Into::into)
    }

    pub fn highest_rank(
        &self,
        partition: &PartitionKey,
    ) -> SortableResult<Option<Rank>, StoreRecordId<S>> {
        Ok(self.load_set(partition)?.highest_rank())
    }

    pub fn lowest_rank(
        &self,
        partition: &PartitionKey,
    ) -> SortableResult<Option<Rank>, StoreRecordId<S>> {
        Ok(self.load_set(partition)?.lowest_rank())
    }

    pub fn is_first(&self, id: StoreRecordId<S>) -> SortableResult<bool, StoreRecordId<S>> {
        let (_, set) = self.member_set(id)?;
        Ok(set.first().map(Sortable::id) == Some(id))
    }

    pub fn is_last(&self, id: StoreRecordId<S>) -> SortableResult<bool, StoreRecordId<S>> {
        let (_, set) = self.member_set(id)?;
        Ok(set.last().map(Sortable::id) == Some(id))
    }

    /// Number of active (non-tombstoned) records in `partition`.
    pub fn active_count(
        &self,
        partition: &PartitionKey,
    ) -> SortableResult<usize, StoreRecordId<S>> {
        Ok(self.store.load_partition(partition, false)?.len())
    }

    fn mutate<T>(
        &self,
        op: &'static str,
        work: impl FnOnce() -> SortableResult<T, StoreRecordId<S>>,
    ) -> SortableResult<T, StoreRecordId<S>> {
        let started_at = Instant::now();
        let result = self.store.in_transaction(work);
        match &result {
            Ok(_) => info!(
                "event=sortable_op module=service status=ok op={op} duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=sortable_op module=service status=error op={op} duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    fn move_with(
        &self,
        op: &'static str,
        id: StoreRecordId<S>,
        apply: fn(
            &mut OrderedSet<S::Record>,
            StoreRecordId<S>,
        ) -> Result<RankChanges<StoreRecordId<S>>, OrderedSetError<StoreRecordId<S>>>,
    ) -> SortableResult<Rank, StoreRecordId<S>> {
        self.mutate(op, || {
            let (_, mut set) = self.member_set(id)?;
            let changes = apply(&mut set, id)?;
            self.persist(&changes)?;
            Ok(current_rank(&set, id))
        })
    }

    fn load_set(
        &self,
        partition: &PartitionKey,
    ) -> SortableResult<OrderedSet<S::Record>, StoreRecordId<S>> {
        let records = self.store.load_partition(partition, true)?;
        Ok(OrderedSet::from_records(
            partition.clone(),
            records,
            &self.filter,
            self.start_rank,
        ))
    }

    fn require(&self, id: StoreRecordId<S>) -> SortableResult<S::Record, StoreRecordId<S>> {
        self.store
            .find(id, true)?
            .ok_or(SortableError::NotFound(id))
    }

    /// Loads `id` and the ordered set of its partition; `id` must be orderable.
    fn member_set(
        &self,
        id: StoreRecordId<S>,
    ) -> SortableResult<(S::Record, OrderedSet<S::Record>), StoreRecordId<S>> {
        let record = self.require(id)?;
        let set = self.load_set(record.partition_key())?;
        if !set.contains(id) {
            return Err(SortableError::NotFound(id));
        }
        Ok((record, set))
    }

    fn persist(
        &self,
        changes: &RankChanges<StoreRecordId<S>>,
    ) -> SortableResult<(), StoreRecordId<S>> {
        self.store.update_ranks(changes).map_err(Into::into)
    }
}

fn current_rank<R: Sortable>(set: &OrderedSet<R>, id: R::Id) -> Rank {
    set.rank_of(id).unwrap_or_default()
}
