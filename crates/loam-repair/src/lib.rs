//! Online secondary-index repair.
//!
//! Fixes a single missing or orphaned index entry in place, while the node
//! keeps serving traffic. The engine resolves a [`RepairRequest`] down to
//! exactly one (key, locator) pair, refuses anything ambiguous, serializes
//! with concurrent writers through a shared per-key lock registry, and
//! applies the mutation as a conflict-retryable write unit. Storage access
//! goes through the [`catalog`] traits; [`mem`] provides the in-memory
//! implementation used by the test suite.

pub mod catalog;
pub mod engine;
pub mod mem;
pub mod report;
pub mod request;
pub mod retry;

pub use catalog::{
    Catalog, Collection, GeneratedKeys, IndexCursor, IndexEntry, KeyCandidates, SecondaryIndex,
};
pub use engine::IndexRepairEngine;
pub use report::RepairReport;
pub use request::{RepairAction, RepairRequest};
pub use retry::{run_write_unit, RetryPolicy};
