//! Record and rank value types.
//!
//! # Responsibility
//! - Define the rank value type and the record capability set.
//! - Keep ordering code independent of any concrete record shape.
//!
//! # Invariants
//! - Ranks are non-negative integers.
//! - Deletion is a tombstone (`deleted_at`), never a hard delete.

pub mod order_key;
pub mod record;
