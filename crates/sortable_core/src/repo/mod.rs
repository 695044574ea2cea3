//! Persistence contract and SQLite implementation.
//!
//! # Responsibility
//! - Define the narrow store contract the ordering service depends on.
//! - Isolate SQLite query details from ordering logic.
//!
//! # Invariants
//! - Store APIs return semantic errors (`RecordNotFound`) in addition to DB
//!   transport errors.

pub mod sortable_repo;
