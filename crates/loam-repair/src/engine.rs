//! The repair state machine.
//!
//! One engine instance serves one worker: it owns a reusable encoding pool
//! and shares a per-key lock registry with its peers. `repair` resolves a
//! request down to exactly one (key, locator) pair, then applies or reports
//! the single mutation.

use std::sync::Arc;

use loam_error::{LoamError, Result};
use loam_keyenc::EncodingPool;
use loam_lock::LockRegistry;
use loam_types::{Document, Namespace, RecordId};
use tracing::{debug, info};

use crate::catalog::{Catalog, Collection, SecondaryIndex};
use crate::report::RepairReport;
use crate::request::{RepairAction, RepairRequest};
use crate::retry::{run_write_unit, RetryPolicy};

/// What request resolution pinned down before the action dispatch.
#[derive(Debug, Default)]
struct Located {
    locator: Option<RecordId>,
    document: Option<Document>,
}

/// Per-worker repair engine.
pub struct IndexRepairEngine {
    locks: Arc<LockRegistry>,
    pool: EncodingPool,
    retry: RetryPolicy,
}

impl IndexRepairEngine {
    /// An engine sharing `locks` with the other workers of this node.
    #[must_use]
    pub fn new(locks: Arc<LockRegistry>) -> Self {
        Self {
            locks,
            pool: EncodingPool::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the conflict-retry policy (unbounded by default).
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Execute one repair request against `ns`.
    ///
    /// Fail-fast order: request validation, write acceptance, collection and
    /// index resolution, then the shard-key lock is taken and held until the
    /// report is built.
    pub fn repair<C: Catalog>(
        &mut self,
        catalog: &C,
        ns: &Namespace,
        req: &RepairRequest,
    ) -> Result<RepairReport> {
        req.validate()?;

        if !catalog.can_accept_writes(ns) {
            return Err(LoamError::NotPrimary(ns.to_string()));
        }
        let coll = catalog
            .collection(ns)
            .ok_or_else(|| LoamError::CollectionNotFound(ns.to_string()))?;
        let index = coll
            .index(&req.index_name)
            .ok_or_else(|| LoamError::IndexNotFound(format!("{ns}.{}", req.index_name)))?;

        // Serialize with any concurrent writer of the same shard-key value.
        // The handle borrows the local clone, leaving `self` free below.
        let locks = Arc::clone(&self.locks);
        let _shard_lock = locks.acquire(ns, req.shard_key.as_ref());

        let located = locate(coll, req)?;
        debug!(
            %ns,
            index = %req.index_name,
            locator = ?located.locator,
            has_document = located.document.is_some(),
            action = ?req.action,
            "repair target resolved"
        );

        match req.action {
            RepairAction::Insert => self.do_insert(ns, index, req, located),
            RepairAction::Remove => self.do_remove(ns, index, req, located),
        }
    }

    /// Insert path: the document must exist, key generation must resolve to
    /// exactly one candidate, and the entry must be genuinely missing.
    fn do_insert<I: SecondaryIndex>(
        &mut self,
        ns: &Namespace,
        index: &I,
        req: &RepairRequest,
        located: Located,
    ) -> Result<RepairReport> {
        let (Some(locator), Some(document)) = (located.locator, located.document) else {
            let pk = req
                .primary_key
                .as_ref()
                .map_or_else(|| "<none>".to_owned(), ToString::to_string);
            return Err(LoamError::DocumentNotFound(pk));
        };

        let generated = index.generate_keys(&document)?;
        if generated.keys.is_empty() {
            return Err(LoamError::NoKeysGenerated);
        }
        if generated.keys.len() > 1 && req.index_key.is_none() {
            return Err(LoamError::AmbiguousMatch {
                match_count: generated.keys.len(),
            });
        }
        let key_to_insert = match &req.index_key {
            // An explicit key must be one the document actually generates;
            // anything else would plant an entry key generation can never
            // clean up.
            Some(explicit) => generated
                .keys
                .iter()
                .find(|k| *k == explicit)
                .ok_or(LoamError::KeyMismatch)?,
            None => &generated.keys[0],
        };

        let policy = self.retry;
        let key_bytes =
            self.pool
                .encode_prefixed(index.prefix(), index.encoding_version(), key_to_insert);

        if entry_exists(index, key_bytes, locator) {
            return Err(LoamError::IndexEntryAlreadyExists);
        }

        if req.dry_run {
            debug!(%ns, index = index.name(), %locator, "dry run: insert resolved");
            return Ok(RepairReport::dry_run_insert(key_to_insert.clone(), locator));
        }

        run_write_unit(policy, "repair.insert", ns, || {
            index.insert_entry(key_bytes, locator)
        })?;
        info!(%ns, index = index.name(), %locator, "inserted missing index entry");
        Ok(RepairReport::inserted(1, locator))
    }

    /// Remove path: resolve the orphaned entry either from an explicit key or
    /// by regenerating keys from a still-present document.
    fn do_remove<I: SecondaryIndex>(
        &mut self,
        ns: &Namespace,
        index: &I,
        req: &RepairRequest,
        located: Located,
    ) -> Result<RepairReport> {
        let policy = self.retry;
        let Located { locator, document } = located;

        if let Some(explicit) = &req.index_key {
            // An entry whose document is still present is not an orphan.
            if document.is_some() {
                return Err(LoamError::DocumentStillExists);
            }

            let key_bytes =
                self.pool
                    .encode_prefixed(index.prefix(), index.encoding_version(), explicit);
            let matches = matching_locators(index, key_bytes);
            let requested = req.record_locator.filter(|loc| loc.is_valid());

            let target = if let Some(loc) = requested {
                if !matches.contains(&loc) {
                    return Err(LoamError::IndexEntryNotFound);
                }
                loc
            } else {
                match matches.len() {
                    0 => return Err(LoamError::IndexEntryNotFound),
                    1 => matches[0],
                    n => return Err(LoamError::AmbiguousMatch { match_count: n }),
                }
            };

            if req.dry_run {
                debug!(%ns, index = index.name(), %target, "dry run: remove resolved");
                return Ok(RepairReport::dry_run_remove(explicit.clone(), target));
            }

            run_write_unit(policy, "repair.remove", ns, || {
                index.remove_entry(key_bytes, target)
            })?;
            info!(%ns, index = index.name(), %target, "removed orphaned index entry");
            return Ok(RepairReport::removed(1, target));
        }

        // No explicit key: derive it from the document, which must therefore
        // still exist and generate exactly one candidate.
        let (Some(locator), Some(document)) = (locator, document) else {
            return Err(LoamError::CannotDetermineKey);
        };
        let generated = index.generate_keys(&document)?;
        if generated.keys.is_empty() {
            return Err(LoamError::NoKeysGenerated);
        }
        if generated.keys.len() > 1 {
            return Err(LoamError::AmbiguousMatch {
                match_count: generated.keys.len(),
            });
        }
        let key = &generated.keys[0];
        let key_bytes = self
            .pool
            .encode_prefixed(index.prefix(), index.encoding_version(), key);

        if req.dry_run {
            debug!(%ns, index = index.name(), %locator, "dry run: remove resolved");
            return Ok(RepairReport::dry_run_remove(key.clone(), locator));
        }

        run_write_unit(policy, "repair.remove", ns, || {
            index.remove_entry(key_bytes, locator)
        })?;
        info!(%ns, index = index.name(), %locator, "removed orphaned index entry");
        Ok(RepairReport::removed(1, locator))
    }
}

impl std::fmt::Debug for IndexRepairEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRepairEngine")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Pin down the target record. Primary key takes precedence over a bare
/// locator; a locator is only dereferenced when it is structurally valid.
fn locate<C: Collection>(coll: &C, req: &RepairRequest) -> Result<Located> {
    if let Some(pk) = &req.primary_key {
        return match coll.lookup_primary(pk)? {
            Some(locator) => Ok(Located {
                locator: Some(locator),
                document: coll.fetch(locator),
            }),
            None if req.action == RepairAction::Insert => {
                Err(LoamError::DocumentNotFound(pk.to_string()))
            }
            // For Remove an unresolvable primary key is expected: the
            // document being gone is the premise of an orphan.
            None => Ok(Located::default()),
        };
    }
    if let Some(locator) = req.record_locator {
        let document = if locator.is_valid() {
            coll.fetch(locator)
        } else {
            None
        };
        return Ok(Located {
            locator: Some(locator),
            document,
        });
    }
    Ok(Located::default())
}

/// Whether an exact (key, locator) entry is present.
fn entry_exists<I: SecondaryIndex>(index: &I, key_bytes: &[u8], locator: RecordId) -> bool {
    matching_locators(index, key_bytes).contains(&locator)
}

/// All locators stored under exactly `key_bytes`, in index order.
fn matching_locators<I: SecondaryIndex>(index: &I, key_bytes: &[u8]) -> Vec<RecordId> {
    let mut out = Vec::new();
    let mut cursor = index.cursor();
    let mut entry = cursor.seek(key_bytes);
    while let Some(e) = entry {
        if e.key != key_bytes {
            break;
        }
        out.push(e.locator);
        entry = cursor.next();
    }
    out
}
