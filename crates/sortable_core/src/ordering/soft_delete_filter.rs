//! Soft-delete visibility policy for ordering.
//!
//! # Responsibility
//! - Decide whether a tombstoned record still takes part in ordering.
//!
//! # Invariants
//! - Active records are always orderable.
//! - Per-partition overrides win over the default policy.

use crate::model::record::{PartitionKey, Sortable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How tombstoned records are treated by ordering operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftDeletePolicy {
    /// Tombstoned records are skipped by moves and renumbering.
    #[default]
    ExcludeDeleted,
    /// Tombstoned records keep their slot and are renumbered with the rest.
    IncludeDeleted,
}

/// Policy object injected into the sortable service.
#[derive(Debug, Clone, Default)]
pub struct SoftDeleteFilter {
    default_policy: SoftDeletePolicy,
    overrides: HashMap<PartitionKey, SoftDeletePolicy>,
}

impl SoftDeleteFilter {
    pub fn new(default_policy: SoftDeletePolicy) -> Self {
        Self {
            default_policy,
            overrides: HashMap::new(),
        }
    }

    /// Overrides the policy for one partition.
    pub fn with_partition_policy(mut self, partition: PartitionKey, policy: SoftDeletePolicy) -> Self {
        self.overrides.insert(partition, policy);
        self
    }

    /// Effective policy for `partition`.
    pub fn policy_for(&self, partition: &PartitionKey) -> SoftDeletePolicy {
        self.overrides
            .get(partition)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Returns whether `record` counts toward ordering and renumbering.
    pub fn is_orderable<R: Sortable>(&self, record: &R) -> bool {
        if !record.is_deleted() {
            return true;
        }
        self.policy_for(record.partition_key()) == SoftDeletePolicy::IncludeDeleted
    }
}
