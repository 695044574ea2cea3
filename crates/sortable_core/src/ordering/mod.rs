//! Pure ordering logic over loaded partitions.
//!
//! # Responsibility
//! - Compute rank changes for insert/move/remove/renumber operations.
//! - Decide which tombstoned records still take part in ordering.
//!
//! # Invariants
//! - Nothing in this module touches storage.

pub mod ordered_set;
pub mod soft_delete_filter;
