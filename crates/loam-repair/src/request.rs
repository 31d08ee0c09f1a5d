//! Repair request surface.

use loam_error::{LoamError, Result};
use loam_types::{Document, IndexKey, RecordId, Value};
use serde::{Deserialize, Serialize};

/// Which direction the repair runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairAction {
    /// Add a missing index entry for an existing document.
    Insert,
    /// Delete an orphaned index entry.
    Remove,
}

/// One repair invocation. Created per request, discarded with the response.
///
/// The field contract is transport-agnostic; the serde names are the wire
/// names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RepairRequest {
    /// Insert a missing entry or remove an orphaned one.
    pub action: RepairAction,
    /// Name of the index to repair.
    pub index_name: String,
    /// Primary-key value identifying the document, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Value>,
    /// Shard-key value; when present the engine serializes on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_key: Option<Document>,
    /// Explicit index key, disambiguating multikey candidates or naming an
    /// orphan directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_key: Option<IndexKey>,
    /// Record locator, pinning the exact entry for an ambiguous Remove.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_locator: Option<RecordId>,
    /// Report the plan without mutating anything.
    #[serde(default)]
    pub dry_run: bool,
}

impl RepairRequest {
    /// A minimal request; location parameters start absent.
    pub fn new(action: RepairAction, index_name: impl Into<String>) -> Self {
        Self {
            action,
            index_name: index_name.into(),
            primary_key: None,
            shard_key: None,
            index_key: None,
            record_locator: None,
            dry_run: false,
        }
    }

    /// Check parameter presence and consistency. Runs before anything is
    /// resolved or locked; violations are validation errors, never mutations.
    pub fn validate(&self) -> Result<()> {
        if self.index_name.is_empty() {
            return Err(LoamError::invalid_request("indexName is required"));
        }
        if self.primary_key.is_none() && self.index_key.is_none() {
            return Err(LoamError::invalid_request(
                "must specify primaryKey or indexKey",
            ));
        }
        if let Some(key) = &self.index_key {
            if key.is_empty() {
                return Err(LoamError::invalid_request("indexKey must not be empty"));
            }
        }
        Ok(())
    }
}
