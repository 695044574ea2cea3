//! Ordering use-case services.
//!
//! # Responsibility
//! - Compose ordering logic and store calls into transactional operations.

pub mod sortable_service;
