//! Refcounted per-key lock registry.
//!
//! Serializes writers at document granularity: operations that touch the same
//! (namespace, shard-key-value) pair take turns, while unrelated values never
//! block each other. Entries are created on demand and erased exactly when
//! the last handle referencing them goes away, so the registry stays empty
//! for quiescent keys.
//!
//! The registry is an explicit, lifecycle-owned object injected into call
//! sites — there is no process-wide singleton.

use std::collections::BTreeMap;
use std::sync::Arc;

use loam_types::{Document, Namespace};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use tracing::debug;

type EntryGuard = ArcMutexGuard<RawMutex, ()>;

/// Composite registry key. `Document` carries the canonical value order, so
/// a plain ordered map mirrors the comparator-keyed map this design calls for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct LockKey {
    ns: Namespace,
    value: Document,
}

/// One lazily created per-key mutex plus the number of handles referencing
/// it. `refs` is only ever touched under the registry's structural mutex.
#[derive(Debug)]
struct LockSlot {
    mutex: Arc<Mutex<()>>,
    refs: usize,
}

/// Registry of per-(namespace, shard-key-value) mutexes.
///
/// The structural mutex guards only the map itself and is held for O(map
/// operation) — blocking on a per-key mutex always happens outside it, so a
/// long-held per-key lock never stalls acquisitions for other values.
#[derive(Debug, Default)]
pub struct LockRegistry {
    inner: Mutex<BTreeMap<LockKey, LockSlot>>,
}

impl LockRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `shard_key` within `ns`, blocking until it is
    /// available. An absent or empty shard key requests no serialization and
    /// yields a no-op handle.
    pub fn acquire(&self, ns: &Namespace, shard_key: Option<&Document>) -> LockHandle<'_> {
        let Some(value) = shard_key.filter(|doc| !doc.is_empty()) else {
            return LockHandle::noop();
        };

        let key = LockKey {
            ns: ns.clone(),
            value: value.clone(),
        };

        // Structural section: find-or-create the slot and pin it with a ref.
        let entry_mutex = {
            let mut map = self.inner.lock();
            let slot = map.entry(key.clone()).or_insert_with(|| {
                debug!(ns = %key.ns, "per-key lock entry created");
                LockSlot {
                    mutex: Arc::new(Mutex::new(())),
                    refs: 0,
                }
            });
            slot.refs += 1;
            Arc::clone(&slot.mutex)
        };

        // Blocking wait happens outside the structural mutex.
        let guard = Mutex::lock_arc(&entry_mutex);
        debug!(ns = %key.ns, "per-key lock acquired");

        LockHandle {
            held: Some(HeldLock {
                registry: self,
                key,
                guard,
            }),
        }
    }

    /// Number of live entries; zero when no handle is outstanding.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Drop one reference to `key`, erasing the slot when it was the last.
    fn release(&self, key: &LockKey) {
        let mut map = self.inner.lock();
        if let Some(slot) = map.get_mut(key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                map.remove(key);
                debug!(ns = %key.ns, "per-key lock entry erased");
            }
        }
    }
}

/// What a live (non-noop) handle holds. Field order matters: the guard is
/// dropped before the refcount release touches the registry.
struct HeldLock<'a> {
    registry: &'a LockRegistry,
    key: LockKey,
    guard: EntryGuard,
}

/// Scoped, move-only ownership of one per-key lock.
///
/// Releases on every exit path; an explicitly released or moved-from handle
/// does nothing on drop. Handles obtained without a shard key are inert.
pub struct LockHandle<'a> {
    held: Option<HeldLock<'a>>,
}

impl LockHandle<'_> {
    /// A handle that guards nothing (no serialization was requested).
    #[must_use]
    pub const fn noop() -> Self {
        Self { held: None }
    }

    /// Whether this handle guards nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.held.is_none()
    }

    /// The namespace and shard-key value this handle serializes on.
    #[must_use]
    pub fn guarded_key(&self) -> Option<(&Namespace, &Document)> {
        self.held.as_ref().map(|h| (&h.key.ns, &h.key.value))
    }

    /// Release the lock now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockHandle<'_> {
    fn drop(&mut self) {
        if let Some(held) = self.held.take() {
            let HeldLock {
                registry,
                key,
                guard,
            } = held;
            // Unlock the entry mutex first, then retire the refcount.
            drop(guard);
            registry.release(&key);
            debug!(ns = %key.ns, "per-key lock released");
        }
    }
}

impl std::fmt::Debug for LockHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("noop", &self.is_noop())
            .finish()
    }
}
