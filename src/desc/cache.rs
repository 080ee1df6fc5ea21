//! Process-wide descriptor caches.
//!
//! Entries are computed at most once per key. A thread asking for an entry that another thread
//! is currently computing blocks until the result is published; a thread that re-enters its own
//! in-flight computation computes the value again without caching it.
//!
//! Rust type identities are never unloaded, so descriptor caches are unbounded. Field matches
//! are keyed by stream contents and stop growing at
//! [`MAX_CACHED_FIELD_MATCHES`](crate::constants::MAX_CACHED_FIELD_MATCHES). [`clear`] drops
//! every entry, e.g. between test cases that register conflicting types.

use std::hash::Hash;
use std::sync::{Arc, LazyLock};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};

enum SlotState<V> {
    Pending(ThreadId),
    Ready(V),
    /// The owner unwound without publishing; waiters retry.
    Abandoned,
}

struct Slot<V> {
    state: Mutex<SlotState<V>>,
    ready: Condvar,
}

/// Removes an in-flight slot if its owner unwinds out of `compute`.
struct UnwindGuard<'a, K: Eq + Hash, V> {
    map: &'a DashMap<K, Arc<Slot<V>>>,
    key: &'a K,
    slot: &'a Arc<Slot<V>>,
}

impl<K: Eq + Hash, V> Drop for UnwindGuard<'_, K, V> {
    fn drop(&mut self) {
        self.map.remove_if(self.key, |_, s| Arc::ptr_eq(s, self.slot));
        *self.slot.state.lock() = SlotState::Abandoned;
        self.slot.ready.notify_all();
    }
}

/// Concurrent memoizing map with in-flight placeholders.
pub(crate) struct FutureCache<K, V> {
    map: DashMap<K, Arc<Slot<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> FutureCache<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Returns the cached value for `key`, computing it with `compute` on a miss.
    pub(crate) fn get_or_compute(&self, key: K, compute: impl FnOnce() -> V) -> V {
        let me = thread::current().id();
        let (slot, owner) = match self.map.entry(key.clone()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let slot = Arc::new(Slot {
                    state: Mutex::new(SlotState::Pending(me)),
                    ready: Condvar::new(),
                });
                e.insert(slot.clone());
                (slot, true)
            }
        };

        if owner {
            let guard = UnwindGuard {
                map: &self.map,
                key: &key,
                slot: &slot,
            };
            let value = compute();
            std::mem::forget(guard);
            *slot.state.lock() = SlotState::Ready(value.clone());
            slot.ready.notify_all();
            return value;
        }

        let mut state = slot.state.lock();
        loop {
            match &*state {
                SlotState::Ready(v) => return v.clone(),
                SlotState::Pending(tid) if *tid == me => {
                    drop(state);
                    return compute();
                }
                SlotState::Pending(_) => slot.ready.wait(&mut state),
                SlotState::Abandoned => {
                    drop(state);
                    return self.get_or_compute(key, compute);
                }
            }
        }
    }

    pub(crate) fn clear(&self) {
        self.map.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

pub(crate) mod globals {
    use std::any::TypeId;
    use std::sync::Arc;

    use super::{FutureCache, LazyLock};
    use crate::desc::ClassDesc;
    use crate::desc::field::StreamField;
    use crate::error::Result;

    pub(crate) type DescResult = Result<Arc<ClassDesc>>;

    /// Local descriptors by Rust type.
    pub(crate) static LOCAL: LazyLock<FutureCache<TypeId, DescResult>> =
        LazyLock::new(FutureCache::new);

    /// Array descriptors by wire name.
    pub(crate) static ARRAYS: LazyLock<FutureCache<Arc<str>, DescResult>> =
        LazyLock::new(FutureCache::new);

    /// Matched field lists by local type and wire field signature.
    pub(crate) static REFLECTORS: LazyLock<
        FutureCache<(TypeId, String), Result<Arc<Vec<StreamField>>>>,
    > = LazyLock::new(FutureCache::new);
}

/// Drops every cached descriptor, field match and interned field type string.
pub fn clear() {
    globals::LOCAL.clear();
    globals::ARRAYS.clear();
    globals::REFLECTORS.clear();
    super::clear_interned();
    log::debug!("[desc] caches cleared");
}

/// Number of cached local and array descriptors.
pub fn len() -> usize {
    globals::LOCAL.len() + globals::ARRAYS.len()
}
