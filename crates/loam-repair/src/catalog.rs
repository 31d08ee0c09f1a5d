//! Collaborator traits the repair engine runs against.
//!
//! The engine never talks to a storage engine directly; it resolves
//! collections, indexes, documents and index entries through these seams.
//! Production wires them to the real catalog, tests to [`crate::mem`].

use loam_error::Result;
use loam_types::{Document, EncodingVersion, Namespace, RecordId, Value};
use smallvec::SmallVec;

/// Candidate index keys for one document. Inline capacity covers the common
/// non-multikey case and small fan-outs without allocating.
pub type KeyCandidates = SmallVec<[loam_types::IndexKey; 2]>;

/// One physical index entry: encoded key bytes plus the record they point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub locator: RecordId,
}

/// Output of key generation for a document against one index definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedKeys {
    /// Distinct candidate keys, in canonical order.
    pub keys: KeyCandidates,
    /// Dotted paths whose array values fanned the candidates out.
    pub multikey_paths: Vec<String>,
}

/// Forward scan over a secondary index, in encoded-key order.
pub trait IndexCursor {
    /// Position at the first entry whose key is `>= encoded_key` and return
    /// it, or `None` past the end.
    fn seek(&mut self, encoded_key: &[u8]) -> Option<IndexEntry>;

    /// Advance past the current entry and return the next one.
    fn next(&mut self) -> Option<IndexEntry>;
}

/// A secondary index: definition metadata plus entry-level access.
///
/// Entry mutation takes `&self`; implementations synchronize internally the
/// way a storage engine's index handles do.
pub trait SecondaryIndex {
    fn name(&self) -> &str;

    /// Key-encoding version this index was built with.
    fn encoding_version(&self) -> EncodingVersion;

    /// Identifier prefix prepended to every encoded key of this index.
    fn prefix(&self) -> &[u8];

    /// Derive the candidate keys `document` should be indexed under.
    fn generate_keys(&self, document: &Document) -> Result<GeneratedKeys>;

    /// Open a cursor over the current entries.
    fn cursor(&self) -> Box<dyn IndexCursor + '_>;

    /// Write one entry. Fails with a conflict or constraint error the caller
    /// is expected to map into its retry discipline.
    fn insert_entry(&self, encoded_key: &[u8], locator: RecordId) -> Result<()>;

    /// Delete one entry. Removing an absent entry is not an error.
    fn remove_entry(&self, encoded_key: &[u8], locator: RecordId) -> Result<()>;
}

/// A collection: document store plus its indexes.
pub trait Collection {
    type Index: SecondaryIndex;

    fn namespace(&self) -> &Namespace;

    /// Look up an index by name.
    fn index(&self, name: &str) -> Option<&Self::Index>;

    /// Resolve a primary-key value to a record locator.
    fn lookup_primary(&self, primary_key: &Value) -> Result<Option<RecordId>>;

    /// Point-fetch a document by locator.
    fn fetch(&self, locator: RecordId) -> Option<Document>;
}

/// Top-level resolution root.
pub trait Catalog {
    type Collection: Collection;

    fn collection(&self, ns: &Namespace) -> Option<&Self::Collection>;

    /// Whether this node currently accepts writes for `ns`.
    fn can_accept_writes(&self, ns: &Namespace) -> bool;
}
