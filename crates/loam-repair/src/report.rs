//! Repair outcome reporting.

use loam_types::{IndexKey, RecordId};
use serde::{Deserialize, Serialize};

/// What a repair did, or — under dry-run — what it resolved and would do.
///
/// Counters stay zero for dry runs; the `would_*` fields stay absent for real
/// executions. Exactly one of the two shapes is ever populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    /// Whether this report describes a plan rather than an execution.
    #[serde(default)]
    pub dry_run: bool,
    /// Entries actually written.
    #[serde(default)]
    pub keys_inserted: u64,
    /// Entries actually deleted.
    #[serde(default)]
    pub keys_removed: u64,
    /// Key an Insert dry run resolved and would write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub would_insert: Option<IndexKey>,
    /// Key a Remove dry run resolved and would delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub would_remove: Option<IndexKey>,
    /// Locator the repair resolved to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_locator: Option<RecordId>,
}

impl RepairReport {
    /// Report for an executed Insert.
    #[must_use]
    pub fn inserted(count: u64, locator: RecordId) -> Self {
        Self {
            keys_inserted: count,
            record_locator: Some(locator),
            ..Self::default()
        }
    }

    /// Report for an executed Remove.
    #[must_use]
    pub fn removed(count: u64, locator: RecordId) -> Self {
        Self {
            keys_removed: count,
            record_locator: Some(locator),
            ..Self::default()
        }
    }

    /// Plan for an Insert that resolved but was not executed.
    #[must_use]
    pub fn dry_run_insert(key: IndexKey, locator: RecordId) -> Self {
        Self {
            dry_run: true,
            would_insert: Some(key),
            record_locator: Some(locator),
            ..Self::default()
        }
    }

    /// Plan for a Remove that resolved but was not executed.
    #[must_use]
    pub fn dry_run_remove(key: IndexKey, locator: RecordId) -> Self {
        Self {
            dry_run: true,
            would_remove: Some(key),
            record_locator: Some(locator),
            ..Self::default()
        }
    }
}
