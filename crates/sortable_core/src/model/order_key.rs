//! Order key value type.
//!
//! # Responsibility
//! - Represent one record position inside a partition as an integer rank.
//! - Keep rank arithmetic in one place so callers never do raw `i64` math.
//!
//! # Invariants
//! - A rank is never negative.
//! - Rank comparison is plain integer comparison; ties are broken by callers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Position of a record within its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Rank(i64);

/// Raised when a raw value cannot be a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegativeRankError(pub i64);

impl Display for NegativeRankError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "rank must not be negative, got {}", self.0)
    }
}

impl Error for NegativeRankError {}

impl Rank {
    /// Rank given to the first record appended to an empty partition.
    pub const FIRST: Rank = Rank(1);

    /// Builds a rank from a raw persisted value.
    pub fn new(value: i64) -> Result<Self, NegativeRankError> {
        if value < 0 {
            return Err(NegativeRankError(value));
        }
        Ok(Self(value))
    }

    /// Raw integer value, as stored in the order column.
    pub fn get(self) -> i64 {
        self.0
    }

    /// Three-way comparison of two ranks.
    pub fn compare(a: Rank, b: Rank) -> Ordering {
        a.0.cmp(&b.0)
    }

    /// Rank immediately following `self`.
    pub fn next_after(self) -> Rank {
        Rank(self.0.saturating_add(1))
    }

    /// Rank `offset` slots after `self`.
    pub(crate) fn offset(self, offset: usize) -> Rank {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        Rank(self.0.saturating_add(offset))
    }
}

impl Default for Rank {
    fn default() -> Self {
        Self::FIRST
    }
}

impl Display for Rank {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Rank {
    type Error = NegativeRankError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rank> for i64 {
    fn from(value: Rank) -> Self {
        value.0
    }
}
