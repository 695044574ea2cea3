//! In-memory total order of one partition.
//!
//! # Responsibility
//! - Hold the orderable records of a partition sorted by `(rank, id)`.
//! - Apply insert/move/remove/renumber operations and report the minimal set
//!   of rank changes that must be persisted.
//!
//! # Invariants
//! - After every operation ranks are strictly increasing along `entries`.
//! - Relative placement only shifts records up to the nearest gap.
//! - The high-water rank includes tombstoned records, so appends never reuse a
//!   tombstoned rank until the partition is renumbered.

use crate::model::order_key::Rank;
use crate::model::record::{PartitionKey, Sortable};
use crate::ordering::soft_delete_filter::SoftDeleteFilter;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;

/// Errors raised by ordered-set operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderedSetError<Id> {
    /// Referenced record is not an orderable member of the partition.
    MissingRecord(Id),
    /// Positional index outside `0..=len`.
    IndexOutOfRange { index: usize, len: usize },
    /// Explicit order lists the same record twice.
    DuplicateRecord(Id),
}

impl<Id: Display> Display for OrderedSetError<Id> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRecord(id) => write!(f, "record not in partition: {id}"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "position {index} outside partition of {len} records")
            }
            Self::DuplicateRecord(id) => write!(f, "record listed more than once: {id}"),
        }
    }
}

impl<Id: Debug + Display> Error for OrderedSetError<Id> {}

pub type OrderedSetResult<T, Id> = Result<T, OrderedSetError<Id>>;

/// Rank updates produced by one operation, in partition order.
#[derive(Debug, Clone)]
pub struct RankChanges<Id> {
    changes: Vec<(Id, Rank)>,
    index: HashMap<Id, usize>,
}

impl<Id> Default for RankChanges<Id> {
    fn default() -> Self {
        Self {
            changes: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<Id: PartialEq> PartialEq for RankChanges<Id> {
    fn eq(&self, other: &Self) -> bool {
        self.changes == other.changes
    }
}

impl<Id: Eq> Eq for RankChanges<Id> {}

impl<Id: Copy + Eq + Hash> RankChanges<Id> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new rank; a later push for the same id replaces the earlier one.
    pub fn push(&mut self, id: Id, rank: Rank) {
        match self.index.get(&id) {
            Some(&position) => self.changes[position].1 = rank,
            None => {
                self.index.insert(id, self.changes.len());
                self.changes.push((id, rank));
            }
        }
    }

    pub fn rank_of(&self, id: Id) -> Option<Rank> {
        self.index.get(&id).map(|&position| self.changes[position].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Id, Rank)> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl<Id> IntoIterator for RankChanges<Id> {
    type Item = (Id, Rank);
    type IntoIter = std::vec::IntoIter<(Id, Rank)>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

#[derive(Debug, Clone)]
struct Slot<R> {
    record: R,
    rank: Rank,
}

/// Ordered view over one partition's orderable records.
#[derive(Debug, Clone)]
pub struct OrderedSet<R: Sortable> {
    partition: PartitionKey,
    start: Rank,
    entries: Vec<Slot<R>>,
    high_water: Option<Rank>,
}

impl<R: Sortable> OrderedSet<R> {
    /// Builds the set from a partition load.
    ///
    /// Records of other partitions are ignored. Records rejected by `filter`
    /// are not members but still raise the high-water rank.
    pub fn from_records(
        partition: PartitionKey,
        records: impl IntoIterator<Item = R>,
        filter: &SoftDeleteFilter,
        start: Rank,
    ) -> Self {
        let mut entries = Vec::new();
        let mut high_water: Option<Rank> = None;
        for record in records {
            if record.partition_key() != &partition {
                continue;
            }
            let rank = record.rank();
            high_water = Some(high_water.map_or(rank, |current| current.max(rank)));
            if filter.is_orderable(&record) {
                entries.push(Slot { record, rank });
            }
        }
        entries.sort_by(|a, b| {
            Rank::compare(a.rank, b.rank).then_with(|| a.record.id().cmp(&b.record.id()))
        });

        Self {
            partition,
            start,
            entries,
            high_water,
        }
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Members with their current rank, in order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&R, Rank)> {
        self.entries.iter().map(|slot| (&slot.record, slot.rank))
    }

    pub fn ids(&self) -> Vec<R::Id> {
        self.entries.iter().map(|slot| slot.record.id()).collect()
    }

    pub fn contains(&self, id: R::Id) -> bool {
        self.position_of(id).is_some()
    }

    /// Zero-based position of `id`.
    pub fn position_of(&self, id: R::Id) -> Option<usize> {
        self.entries.iter().position(|slot| slot.record.id() == id)
    }

    pub fn rank_of(&self, id: R::Id) -> Option<Rank> {
        self.position_of(id).map(|index| self.entries[index].rank)
    }

    pub fn first(&self) -> Option<&R> {
        self.entries.first().map(|slot| &slot.record)
    }

    pub fn last(&self) -> Option<&R> {
        self.entries.last().map(|slot| &slot.record)
    }

    pub fn lowest_rank(&self) -> Option<Rank> {
        self.entries.first().map(|slot| slot.rank)
    }

    pub fn highest_rank(&self) -> Option<Rank> {
        self.entries.last().map(|slot| slot.rank)
    }

    pub fn neighbor_before(&self, id: R::Id) -> Option<&R> {
        let index = self.position_of(id)?;
        index
            .checked_sub(1)
            .map(|previous| &self.entries[previous].record)
    }

    pub fn neighbor_after(&self, id: R::Id) -> Option<&R> {
        let index = self.position_of(id)?;
        self.entries.get(index + 1).map(|slot| &slot.record)
    }

    /// Active member holding `rank`, other than `excluding`.
    pub fn active_holder(&self, rank: Rank, excluding: R::Id) -> Option<&R> {
        self.entries
            .iter()
            .find(|slot| {
                slot.rank == rank && slot.record.id() != excluding && !slot.record.is_deleted()
            })
            .map(|slot| &slot.record)
    }

    /// Rank the next appended record receives.
    pub fn next_rank(&self) -> Rank {
        self.high_water.map_or(self.start, Rank::next_after)
    }

    /// Appends `record` at the end of the partition and returns its rank.
    pub fn append(&mut self, record: R) -> Rank {
        let rank = self.next_rank();
        self.high_water = Some(rank);
        self.entries.push(Slot { record, rank });
        rank
    }

    /// Places `record` at `target`'s rank, shifting following records as needed.
    ///
    /// `record` may be a member (it is moved) or a newcomer (it joins the set).
    pub fn insert_before(
        &mut self,
        record: R,
        target: R::Id,
    ) -> OrderedSetResult<RankChanges<R::Id>, R::Id> {
        if record.id() == target {
            return self.require(target).map(|_| RankChanges::new());
        }
        self.require(target)?;
        let before = self.snapshot(&record);
        self.detach(record.id());

        let index = self.require(target)?;
        let rank = self.entries[index].rank;
        self.entries.insert(index, Slot { record, rank });
        self.cascade_from(index);
        Ok(self.diff(&before))
    }

    /// Places `record` right after `target`, shifting following records as needed.
    pub fn insert_after(
        &mut self,
        record: R,
        target: R::Id,
    ) -> OrderedSetResult<RankChanges<R::Id>, R::Id> {
        if record.id() == target {
            return self.require(target).map(|_| RankChanges::new());
        }
        self.require(target)?;
        let before = self.snapshot(&record);
        self.detach(record.id());

        let index = self.require(target)? + 1;
        let rank = self.entries[index - 1].rank.next_after();
        self.entries.insert(index, Slot { record, rank });
        self.cascade_from(index);
        Ok(self.diff(&before))
    }

    /// Drops `id` from the set, leaving a gap.
    pub fn remove(&mut self, id: R::Id) -> OrderedSetResult<R, R::Id> {
        self.detach(id).ok_or(OrderedSetError::MissingRecord(id))
    }

    /// Moves `id` to zero-based `index` and densifies ranks from the start rank.
    pub fn move_to_index(
        &mut self,
        id: R::Id,
        index: usize,
    ) -> OrderedSetResult<RankChanges<R::Id>, R::Id> {
        let len = self.entries.len();
        if index >= len {
            return Err(OrderedSetError::IndexOutOfRange { index, len });
        }
        let current = self.require(id)?;
        let before = self.snapshot_members();
        let slot = self.entries.remove(current);
        self.entries.insert(index, slot);
        self.assign_dense();
        Ok(self.diff(&before))
    }

    /// Exchanges the ranks of two members.
    pub fn swap(&mut self, a: R::Id, b: R::Id) -> OrderedSetResult<RankChanges<R::Id>, R::Id> {
        let first = self.require(a)?;
        let second = self.require(b)?;
        if first == second {
            return Ok(RankChanges::new());
        }
        let before = self.snapshot_members();
        let rank_a = self.entries[first].rank;
        self.entries[first].rank = self.entries[second].rank;
        self.entries[second].rank = rank_a;
        self.entries.swap(first, second);
        Ok(self.diff(&before))
    }

    /// Swaps `id` with its predecessor; no-op for the first member.
    pub fn move_up(&mut self, id: R::Id) -> OrderedSetResult<RankChanges<R::Id>, R::Id> {
        match self.neighbor_before(id).map(Sortable::id) {
            Some(previous) => self.swap(id, previous),
            None => self.require(id).map(|_| RankChanges::new()),
        }
    }

    /// Swaps `id` with its successor; no-op for the last member.
    pub fn move_down(&mut self, id: R::Id) -> OrderedSetResult<RankChanges<R::Id>, R::Id> {
        match self.neighbor_after(id).map(Sortable::id) {
            Some(next) => self.swap(id, next),
            None => self.require(id).map(|_| RankChanges::new()),
        }
    }

    /// Moves `id` in front of the current first member.
    pub fn move_to_start(&mut self, id: R::Id) -> OrderedSetResult<RankChanges<R::Id>, R::Id> {
        let index = self.require(id)?;
        let first = self.entries[0].record.id();
        let record = self.entries[index].record.clone();
        self.insert_before(record, first)
    }

    /// Moves `id` behind the current last member.
    pub fn move_to_end(&mut self, id: R::Id) -> OrderedSetResult<RankChanges<R::Id>, R::Id> {
        let index = self.require(id)?;
        let last = self.entries[self.entries.len() - 1].record.id();
        let record = self.entries[index].record.clone();
        self.insert_after(record, last)
    }

    /// Reassigns dense ranks from the start rank, preserving order.
    pub fn renumber(&mut self) -> RankChanges<R::Id> {
        let before = self.snapshot_members();
        self.assign_dense();
        self.diff(&before)
    }

    /// Puts `records` first, in the given order, followed by the remaining
    /// members in their current order; then densifies ranks.
    ///
    /// Listed records do not need to be members (e.g. tombstones).
    pub fn reorder(&mut self, records: Vec<R>) -> OrderedSetResult<RankChanges<R::Id>, R::Id> {
        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert(record.id()) {
                return Err(OrderedSetError::DuplicateRecord(record.id()));
            }
        }

        let mut before = self.snapshot_members();
        for record in &records {
            before.entry(record.id()).or_insert(record.rank());
        }

        let rest: Vec<Slot<R>> = self
            .entries
            .drain(..)
            .filter(|slot| !seen.contains(&slot.record.id()))
            .collect();
        self.entries = records
            .into_iter()
            .map(|record| {
                let rank = record.rank();
                Slot { record, rank }
            })
            .chain(rest)
            .collect();
        self.assign_dense();
        Ok(self.diff(&before))
    }

    fn require(&self, id: R::Id) -> OrderedSetResult<usize, R::Id> {
        self.position_of(id)
            .ok_or(OrderedSetError::MissingRecord(id))
    }

    fn detach(&mut self, id: R::Id) -> Option<R> {
        let index = self.position_of(id)?;
        Some(self.entries.remove(index).record)
    }

    fn cascade_from(&mut self, index: usize) {
        for current in index + 1..self.entries.len() {
            let floor = self.entries[current - 1].rank.next_after();
            if self.entries[current].rank >= floor {
                break;
            }
            self.entries[current].rank = floor;
        }
        if let Some(last) = self.entries.last() {
            self.raise_high_water(last.rank);
        }
    }

    fn assign_dense(&mut self) {
        let start = self.start;
        for (index, slot) in self.entries.iter_mut().enumerate() {
            slot.rank = start.offset(index);
        }
        if let Some(last) = self.entries.last() {
            self.raise_high_water(last.rank);
        }
    }

    fn raise_high_water(&mut self, rank: Rank) {
        self.high_water = Some(self.high_water.map_or(rank, |current| current.max(rank)));
    }

    fn snapshot_members(&self) -> HashMap<R::Id, Rank> {
        self.entries
            .iter()
            .map(|slot| (slot.record.id(), slot.rank))
            .collect()
    }

    fn snapshot(&self, incoming: &R) -> HashMap<R::Id, Rank> {
        let mut before = self.snapshot_members();
        before.entry(incoming.id()).or_insert(incoming.rank());
        before
    }

    fn diff(&self, before: &HashMap<R::Id, Rank>) -> RankChanges<R::Id> {
        let mut changes = RankChanges::new();
        for slot in &self.entries {
            let id = slot.record.id();
            if before.get(&id) != Some(&slot.rank) {
                changes.push(id, slot.rank);
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::{OrderedSet, OrderedSetError, RankChanges};
    use crate::model::order_key::Rank;
    use crate::model::record::{PartitionKey, SortableRecord};
    use crate::ordering::soft_delete_filter::{SoftDeleteFilter, SoftDeletePolicy};
    use uuid::Uuid;

    fn record(rank: i64) -> SortableRecord {
        SortableRecord::new(
            Uuid::new_v4(),
            PartitionKey::Global,
            Rank::new(rank).unwrap(),
        )
    }

    fn set_of(records: &[SortableRecord]) -> OrderedSet<SortableRecord> {
        OrderedSet::from_records(
            PartitionKey::Global,
            records.to_vec(),
            &SoftDeleteFilter::default(),
            Rank::FIRST,
        )
    }

    fn ranks(set: &OrderedSet<SortableRecord>) -> Vec<i64> {
        set.iter().map(|(_, rank)| rank.get()).collect()
    }

    #[test]
    fn append_to_empty_partition_starts_at_one() {
        let mut set = set_of(&[]);
        assert_eq!(set.append(record(0)).get(), 1);
        assert_eq!(set.append(record(0)).get(), 2);
    }

    #[test]
    fn append_never_reclaims_tombstoned_rank() {
        let a = record(1);
        let mut b = record(2);
        b.deleted_at = Some(10);
        let set = set_of(&[a, b]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.next_rank().get(), 3);
    }

    #[test]
    fn insert_before_shifts_only_until_gap() {
        let a = record(1);
        let b = record(2);
        let c = record(3);
        let d = record(10);
        let newcomer = record(0);
        let mut set = set_of(&[a.clone(), b.clone(), c.clone(), d.clone()]);

        let changes = set.insert_before(newcomer.clone(), b.id).unwrap();

        assert_eq!(
            set.ids(),
            vec![a.id, newcomer.id, b.id, c.id, d.id]
        );
        assert_eq!(ranks(&set), vec![1, 2, 3, 4, 10]);
        assert_eq!(changes.len(), 3);
        assert_eq!(changes.rank_of(newcomer.id), Some(Rank::new(2).unwrap()));
        assert_eq!(changes.rank_of(d.id), None);
    }

    #[test]
    fn insert_after_moves_existing_member() {
        let a = record(1);
        let b = record(2);
        let c = record(3);
        let mut set = set_of(&[a.clone(), b.clone(), c.clone()]);

        let changes = set.insert_after(a.clone(), c.id).unwrap();

        assert_eq!(set.ids(), vec![b.id, c.id, a.id]);
        assert_eq!(ranks(&set), vec![2, 3, 4]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.rank_of(a.id), Some(Rank::new(4).unwrap()));
    }

    #[test]
    fn insert_relative_to_missing_target_fails() {
        let a = record(1);
        let mut set = set_of(&[a.clone()]);
        let ghost = Uuid::new_v4();
        let err = set.insert_before(a, ghost).unwrap_err();
        assert_eq!(err, OrderedSetError::MissingRecord(ghost));
    }

    #[test]
    fn remove_leaves_gap() {
        let a = record(1);
        let b = record(2);
        let c = record(3);
        let mut set = set_of(&[a, b.clone(), c]);
        set.remove(b.id).unwrap();
        assert_eq!(ranks(&set), vec![1, 3]);
    }

    #[test]
    fn move_to_index_densifies() {
        let a = record(1);
        let b = record(4);
        let c = record(9);
        let mut set = set_of(&[a.clone(), b.clone(), c.clone()]);

        set.move_to_index(c.id, 0).unwrap();

        assert_eq!(set.ids(), vec![c.id, a.id, b.id]);
        assert_eq!(ranks(&set), vec![1, 2, 3]);
        let err = set.move_to_index(c.id, 3).unwrap_err();
        assert_eq!(err, OrderedSetError::IndexOutOfRange { index: 3, len: 3 });
    }

    #[test]
    fn renumber_preserves_relative_order() {
        let a = record(5);
        let b = record(7);
        let c = record(20);
        let mut set = set_of(&[c.clone(), a.clone(), b.clone()]);

        let changes = set.renumber();

        assert_eq!(set.ids(), vec![a.id, b.id, c.id]);
        assert_eq!(ranks(&set), vec![1, 2, 3]);
        assert_eq!(changes.len(), 3);
        assert!(set.renumber().is_empty());
    }

    #[test]
    fn renumber_includes_tombstones_under_include_policy() {
        let a = record(3);
        let mut b = record(6);
        b.deleted_at = Some(1);
        let mut set = OrderedSet::from_records(
            PartitionKey::Global,
            vec![a.clone(), b.clone()],
            &SoftDeleteFilter::new(SoftDeletePolicy::IncludeDeleted),
            Rank::FIRST,
        );
        let changes = set.renumber();
        assert_eq!(changes.rank_of(b.id), Some(Rank::new(2).unwrap()));
    }

    #[test]
    fn swap_and_neighbor_moves() {
        let a = record(1);
        let b = record(2);
        let c = record(3);
        let mut set = set_of(&[a.clone(), b.clone(), c.clone()]);

        set.move_down(a.id).unwrap();
        assert_eq!(set.ids(), vec![b.id, a.id, c.id]);
        set.move_up(c.id).unwrap();
        assert_eq!(set.ids(), vec![b.id, c.id, a.id]);
        assert!(set.move_up(b.id).unwrap().is_empty());
        assert!(set.move_down(a.id).unwrap().is_empty());
        assert_eq!(ranks(&set), vec![1, 2, 3]);
    }

    #[test]
    fn move_to_start_and_end() {
        let a = record(1);
        let b = record(2);
        let c = record(3);
        let mut set = set_of(&[a.clone(), b.clone(), c.clone()]);

        set.move_to_start(c.id).unwrap();
        assert_eq!(set.ids(), vec![c.id, a.id, b.id]);
        set.move_to_end(c.id).unwrap();
        assert_eq!(set.ids(), vec![a.id, b.id, c.id]);
        assert!(set.move_to_end(c.id).unwrap().is_empty());
    }

    #[test]
    fn reorder_places_listed_first_and_rejects_duplicates() {
        let a = record(1);
        let b = record(2);
        let c = record(3);
        let mut set = set_of(&[a.clone(), b.clone(), c.clone()]);

        set.reorder(vec![c.clone(), a.clone()]).unwrap();
        assert_eq!(set.ids(), vec![c.id, a.id, b.id]);
        assert_eq!(ranks(&set), vec![1, 2, 3]);

        let err = set.reorder(vec![b.clone(), b.clone()]).unwrap_err();
        assert_eq!(err, OrderedSetError::DuplicateRecord(b.id));
    }

    #[test]
    fn rank_changes_push_replaces_earlier_entry() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut changes = RankChanges::new();
        changes.push(id, Rank::new(3).unwrap());
        changes.push(other, Rank::new(4).unwrap());
        changes.push(id, Rank::new(7).unwrap());

        assert_eq!(changes.len(), 2);
        assert_eq!(changes.rank_of(id), Some(Rank::new(7).unwrap()));
        assert_eq!(
            changes.iter().map(|(current, _)| *current).collect::<Vec<_>>(),
            vec![id, other]
        );
    }

    #[test]
    fn renumber_large_gapped_partition_reports_each_record_once() {
        let records: Vec<SortableRecord> = (0..20_000).map(|index| record(index * 3 + 2)).collect();
        let mut set = set_of(&records);

        let changes = set.renumber();

        assert_eq!(changes.len(), records.len());
        assert_eq!(changes.rank_of(records[0].id), Some(Rank::FIRST));
        assert_eq!(
            changes.rank_of(records[19_999].id),
            Some(Rank::new(20_000).unwrap())
        );
    }

    #[test]
    fn active_holder_ignores_excluded_id() {
        let a = record(2);
        let set = set_of(&[a.clone()]);
        let two = Rank::new(2).unwrap();
        assert_eq!(set.active_holder(two, Uuid::new_v4()).map(|r| r.id), Some(a.id));
        assert!(set.active_holder(two, a.id).is_none());
    }
}
