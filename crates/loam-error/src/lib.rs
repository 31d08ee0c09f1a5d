//! Error taxonomy for the LoamDB index-repair subsystem.
//!
//! Three classes, distinguishable by the caller:
//! - **validation** errors: bad/contradictory parameters, not-primary, or a
//!   missing collection/index — reported before any mutation is attempted;
//! - **resolution** errors: the repair could not be narrowed to exactly one
//!   `(key, locator)` pair, or the pair is already in the requested state.
//!   These carry stable symbolic codes so callers can script idempotent
//!   repair loops (e.g. treat `IndexEntryAlreadyExists` as success);
//! - **conflicts**: optimistic-concurrency aborts from the storage layer,
//!   normally retried inside the engine and surfaced only when a retry
//!   policy abandons them.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LoamError>;

/// Every failure the repair subsystem can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoamError {
    // --- validation -------------------------------------------------------
    /// The target collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// The named index does not exist on the collection.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// The collection has no primary-key index to resolve documents through.
    #[error("primary-key index not found on {0}")]
    PrimaryKeyIndexNotFound(String),

    /// This node does not currently accept writes for the namespace.
    #[error("not primary for {0}")]
    NotPrimary(String),

    /// The request is missing or contradicts required parameters.
    #[error("invalid repair request: {0}")]
    InvalidRequest(String),

    /// No document matches the supplied primary key.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    // --- resolution -------------------------------------------------------
    /// The document generates no index keys; nothing to repair.
    #[error("document generates no index keys")]
    NoKeysGenerated,

    /// More than one candidate matched and nothing disambiguates them.
    #[error("ambiguous match: {match_count} candidates")]
    AmbiguousMatch {
        /// Number of candidates observed.
        match_count: usize,
    },

    /// The explicit index key is not among the keys the document generates.
    #[error("provided index key does not match any key generated from the document")]
    KeyMismatch,

    /// The `(key, locator)` pair is already present; insert is a no-op.
    #[error("index entry already exists, no repair needed")]
    IndexEntryAlreadyExists,

    /// No stored entry matches the resolved `(key, locator)` pair.
    #[error("index entry not found")]
    IndexEntryNotFound,

    /// Orphan removal refused: the source document still exists.
    #[error("document still exists, cannot remove entry as orphan")]
    DocumentStillExists,

    /// Remove could not resolve any key (no document, no explicit key).
    #[error("cannot determine index key to remove")]
    CannotDetermineKey,

    /// A unique index already holds this key under a different locator.
    #[error("duplicate key on unique index: {0}")]
    DuplicateKey(String),

    // --- storage ----------------------------------------------------------
    /// Optimistic-concurrency conflict; the write unit must be re-executed.
    #[error("write conflict: {0}")]
    WriteConflict(String),

    /// Storage-engine failure unrelated to concurrency.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invariant violation inside the subsystem itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LoamError {
    /// Build a [`LoamError::InvalidRequest`].
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Build a [`LoamError::WriteConflict`].
    pub fn write_conflict(msg: impl Into<String>) -> Self {
        Self::WriteConflict(msg.into())
    }

    /// Build a [`LoamError::Storage`].
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Build a [`LoamError::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable symbolic code for the transport surface.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::CollectionNotFound(_) => "CollectionNotFound",
            Self::IndexNotFound(_) => "IndexNotFound",
            Self::PrimaryKeyIndexNotFound(_) => "PrimaryKeyIndexNotFound",
            Self::NotPrimary(_) => "NotPrimary",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::DocumentNotFound(_) => "DocumentNotFound",
            Self::NoKeysGenerated => "NoKeysGenerated",
            Self::AmbiguousMatch { .. } => "AmbiguousMatch",
            Self::KeyMismatch => "KeyMismatch",
            Self::IndexEntryAlreadyExists => "IndexEntryAlreadyExists",
            Self::IndexEntryNotFound => "IndexEntryNotFound",
            Self::DocumentStillExists => "DocumentStillExists",
            Self::CannotDetermineKey => "CannotDetermineKey",
            Self::DuplicateKey(_) => "DuplicateKey",
            Self::WriteConflict(_) => "WriteConflict",
            Self::Storage(_) => "Storage",
            Self::Internal(_) => "Internal",
        }
    }

    /// Whether this is a resolution error (repair loops may branch on these).
    #[must_use]
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::NoKeysGenerated
                | Self::AmbiguousMatch { .. }
                | Self::KeyMismatch
                | Self::IndexEntryAlreadyExists
                | Self::IndexEntryNotFound
                | Self::DocumentStillExists
                | Self::CannotDetermineKey
                | Self::DuplicateKey(_)
        )
    }

    /// Whether this is an optimistic-concurrency conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Test: taxonomy classifiers are disjoint ===
    #[test]
    fn test_taxonomy_disjoint() {
        let validation = LoamError::invalid_request("x");
        let resolution = LoamError::AmbiguousMatch { match_count: 3 };
        let conflict = LoamError::write_conflict("page 4");

        assert!(!validation.is_resolution() && !validation.is_conflict());
        assert!(resolution.is_resolution() && !resolution.is_conflict());
        assert!(conflict.is_conflict() && !conflict.is_resolution());
    }

    // === Test: symbolic codes are stable and payload-independent ===
    #[test]
    fn test_codes() {
        assert_eq!(
            LoamError::AmbiguousMatch { match_count: 2 }.code(),
            "AmbiguousMatch"
        );
        assert_eq!(
            LoamError::AmbiguousMatch { match_count: 9 }.code(),
            "AmbiguousMatch"
        );
        assert_eq!(LoamError::IndexEntryAlreadyExists.code(), "IndexEntryAlreadyExists");
        assert_eq!(LoamError::NotPrimary("a.b".into()).code(), "NotPrimary");
    }

    // === Test: display carries the useful payload ===
    #[test]
    fn test_display() {
        let err = LoamError::CollectionNotFound("app.users".into());
        assert_eq!(err.to_string(), "collection not found: app.users");
        let err = LoamError::AmbiguousMatch { match_count: 3 };
        assert_eq!(err.to_string(), "ambiguous match: 3 candidates");
    }
}
