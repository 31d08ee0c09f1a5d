//! Shared types for the LoamDB secondary-index repair subsystem.
//!
//! Everything here is transport- and storage-agnostic: a canonical value
//! model, collection namespaces, record locators, index-key tuples, and the
//! key-encoding version discriminant.

use std::fmt;

use serde::{Deserialize, Serialize};

mod value;

pub use value::{Document, Value, get_path};

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// A fully qualified collection name: database plus collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Namespace {
    db: String,
    coll: String,
}

impl Namespace {
    /// Build a namespace from database and collection names.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Parse a `db.collection` string. The collection part may itself
    /// contain dots; the split happens at the first one.
    #[must_use]
    pub fn parse(ns: &str) -> Option<Self> {
        let (db, coll) = ns.split_once('.')?;
        if db.is_empty() || coll.is_empty() {
            return None;
        }
        Some(Self::new(db, coll))
    }

    /// Database name.
    #[must_use]
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Collection name.
    #[must_use]
    pub fn coll(&self) -> &str {
        &self.coll
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

// ---------------------------------------------------------------------------
// RecordId
// ---------------------------------------------------------------------------

/// Storage-engine record locator: opaque, totally ordered, independent of any
/// index key.
///
/// Ids at or below zero are reserved/invalid; [`RecordId::is_valid`] is the
/// test. Invalid ids are representable on purpose — a caller-supplied garbage
/// locator must flow through point-fetch and simply fail to resolve.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Wrap a raw locator value.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw locator value.
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whether this id can point at a stored record.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// IndexKey
// ---------------------------------------------------------------------------

/// An ordered tuple of field values forming one secondary-index key.
///
/// Order and equality follow the canonical [`Value`] order component-wise, so
/// two keys compare the same way their encoded bytes do.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct IndexKey(Vec<Value>);

impl IndexKey {
    /// Build a key from its components, in index field order.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Key components in index field order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for IndexKey {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for IndexKey {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

// ---------------------------------------------------------------------------
// EncodingVersion
// ---------------------------------------------------------------------------

/// On-disk key-encoding version.
///
/// The discriminant leads every encoded key so entries written under
/// different versions never interleave in byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EncodingVersion {
    /// Initial format.
    #[default]
    V1,
    /// Reserved successor format; identical layout today, distinct tag.
    V2,
}

impl EncodingVersion {
    /// Leading tag byte for this version.
    #[must_use]
    pub const fn discriminant(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}
