//! Sortable store configuration.
//!
//! # Responsibility
//! - Describe which table/columns back a sortable record type.
//! - Carry ordering policies (soft-delete visibility, restore conflicts).
//! - Load configuration from TOML and validate it before use.
//!
//! # Invariants
//! - Every table/column name is a plain SQL identifier; names are
//!   interpolated into SQL only after `validate()` succeeds.
//! - `start_rank` is at least 1.

use crate::model::order_key::Rank;
use crate::ordering::soft_delete_filter::SoftDeletePolicy;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier regex must compile")
});

const DEFAULT_TABLE: &str = "sortable_items";
const DEFAULT_ID_COLUMN: &str = "id";
const DEFAULT_ORDER_COLUMN: &str = "order_column";
const DEFAULT_DELETED_AT_COLUMN: &str = "deleted_at";
const DEFAULT_UPDATED_AT_COLUMN: &str = "updated_at";

/// What to do when a restored record's prior rank is held by an active one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreConflictPolicy {
    /// Active holder keeps its rank; restored record goes right after it.
    #[default]
    Reposition,
    /// Fail the restore with a conflict error.
    Reject,
}

/// Errors from configuration loading and validation.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Toml(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Toml(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value)
    }
}

/// Configuration of one sortable record type.
///
/// ```toml
/// table = "dummies"
/// order_column = "order_column"
/// partition_column = "list_id"
/// soft_delete_policy = "exclude_deleted"
/// restore_conflict = "reposition"
/// ignore_timestamps = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SortableConfig {
    pub table: String,
    pub id_column: String,
    pub order_column: String,
    /// `None` keeps one global ordering for the whole table.
    pub partition_column: Option<String>,
    pub deleted_at_column: String,
    /// Epoch ms column touched on every rank/tombstone write.
    pub updated_at_column: String,
    /// Leaves `updated_at_column` alone (and does not require it to exist).
    pub ignore_timestamps: bool,
    /// First rank handed out by renumber and explicit reorders.
    pub start_rank: i64,
    pub soft_delete_policy: SoftDeletePolicy,
    pub restore_conflict: RestoreConflictPolicy,
}

impl Default for SortableConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            order_column: DEFAULT_ORDER_COLUMN.to_string(),
            partition_column: None,
            deleted_at_column: DEFAULT_DELETED_AT_COLUMN.to_string(),
            updated_at_column: DEFAULT_UPDATED_AT_COLUMN.to_string(),
            ignore_timestamps: false,
            start_rank: Rank::FIRST.get(),
            soft_delete_policy: SoftDeletePolicy::default(),
            restore_conflict: RestoreConflictPolicy::default(),
        }
    }
}

impl SortableConfig {
    /// Default configuration bound to `table`.
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Sets the partition column.
    pub fn partitioned_by(mut self, column: impl Into<String>) -> Self {
        self.partition_column = Some(column.into());
        self
    }

    /// Stops touching an updated-at column.
    pub fn without_timestamps(mut self) -> Self {
        self.ignore_timestamps = true;
        self
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validates identifiers and numeric bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("table", &self.table)?;
        validate_identifier("id_column", &self.id_column)?;
        validate_identifier("order_column", &self.order_column)?;
        validate_identifier("deleted_at_column", &self.deleted_at_column)?;
        if let Some(column) = &self.partition_column {
            validate_identifier("partition_column", column)?;
        }
        if let Some(column) = self.timestamp_column() {
            validate_identifier("updated_at_column", column)?;
        }

        let mut columns = vec![
            self.id_column.as_str(),
            self.order_column.as_str(),
            self.deleted_at_column.as_str(),
        ];
        columns.extend(self.partition_column.as_deref());
        columns.extend(self.timestamp_column());
        for (index, column) in columns.iter().enumerate() {
            if columns[..index].contains(column) {
                return Err(ConfigError::Invalid(format!(
                    "column `{column}` is mapped more than once"
                )));
            }
        }

        if self.start_rank < Rank::FIRST.get() {
            return Err(ConfigError::Invalid(format!(
                "start_rank must be at least {}, got {}",
                Rank::FIRST,
                self.start_rank
            )));
        }
        Ok(())
    }

    /// Updated-at column to touch, unless timestamps are ignored.
    pub fn timestamp_column(&self) -> Option<&str> {
        if self.ignore_timestamps {
            return None;
        }
        Some(self.updated_at_column.as_str())
    }

    /// Whether the table is the one created by this crate's migrations.
    pub fn uses_bundled_table(&self) -> bool {
        self.table == DEFAULT_TABLE
    }

    /// Configured start rank.
    pub fn start_rank(&self) -> Rank {
        Rank::new(self.start_rank).unwrap_or(Rank::FIRST)
    }
}

fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if IDENTIFIER_RE.is_match(value) {
        return Ok(());
    }
    Err(ConfigError::Invalid(format!(
        "{field} `{value}` is not a valid SQL identifier"
    )))
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, RestoreConflictPolicy, SortableConfig};
    use crate::ordering::soft_delete_filter::SoftDeletePolicy;

    #[test]
    fn defaults_are_valid() {
        let config = SortableConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.table, "sortable_items");
        assert_eq!(config.order_column, "order_column");
        assert_eq!(config.start_rank().get(), 1);
        assert!(config.uses_bundled_table());
        assert!(!SortableConfig::for_table("dummies").uses_bundled_table());
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = SortableConfig::from_toml_str(
            r#"
            table = "dummies"
            partition_column = "list_id"
            soft_delete_policy = "include_deleted"
            restore_conflict = "reject"
            "#,
        )
        .expect("config should parse");
        assert_eq!(config.table, "dummies");
        assert_eq!(config.partition_column.as_deref(), Some("list_id"));
        assert_eq!(config.id_column, "id");
        assert_eq!(config.soft_delete_policy, SoftDeletePolicy::IncludeDeleted);
        assert_eq!(config.restore_conflict, RestoreConflictPolicy::Reject);
    }

    #[test]
    fn rejects_injection_in_identifiers() {
        let err = SortableConfig::for_table("dummies; DROP TABLE dummies")
            .validate()
            .expect_err("unsafe table name must be rejected");
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("table")));
    }

    #[test]
    fn rejects_duplicate_column_mapping() {
        let mut config = SortableConfig::default();
        config.order_column = "id".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ignore_timestamps_drops_timestamp_column() {
        let config = SortableConfig::from_toml_str("ignore_timestamps = true").unwrap();
        assert_eq!(config.timestamp_column(), None);
        assert_eq!(
            SortableConfig::default().timestamp_column(),
            Some("updated_at")
        );
    }

    #[test]
    fn rejects_start_rank_below_one() {
        let err = SortableConfig::from_toml_str("start_rank = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = SortableConfig::from_toml_str("sort_column = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
