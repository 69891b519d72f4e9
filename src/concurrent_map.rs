//! ConcurrentMap: a hash map behind a single reader/writer lock.

use crate::reentrancy::{Reentrancy, TraversalGuard};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::ops::ControlFlow;
use hashbrown::raw::RawIter;
use hashbrown::HashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::hash_map::RandomState;

/// A hash map that is safe for concurrent use by multiple threads.
///
/// Every operation takes the internal lock for its whole duration: `len`,
/// `get`, `contains_key` and traversals take it shared, `set`, `insert`,
/// `delete`, `remove`, `clear` and `extend` take it exclusively. The lock is
/// never handed out to callers.
///
/// # Traversal and self-deadlock
///
/// [`iter`](Self::iter) and [`scan`](Self::scan) hold the shared lock for the
/// whole traversal, so they observe one consistent snapshot and writers block
/// until the traversal ends or is dropped. Writing to the same map from inside
/// its own traversal therefore deadlocks (the lock is not reentrant). Debug
/// builds panic instead to surface the bug, but release builds block forever,
/// so do not rely on the panic. The same holds for the closure passed to
/// [`get_with`](Self::get_with). Reads inside a traversal, including nested
/// traversals, are fine. Use [`snapshot`](Self::snapshot) when the traversal
/// body needs to write.
///
/// # Fairness
///
/// Shared acquisitions queue behind a waiting writer, so a steady stream of
/// readers cannot starve `set`/`delete`/`clear`. The one exception is a read
/// issued on a thread that already has a traversal of this map open: it joins
/// the shared lock that thread already holds instead of waiting.
pub struct ConcurrentMap<K, V, S = RandomState> {
    inner: RwLock<HashMap<K, V, S>>,
    reentrancy: Reentrancy,
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Create an empty map with room for about `capacity` entries. The hint
    /// only preallocates; it does not bound growth.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<K, V, S> Default for ConcurrentMap<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        Self::from_map(HashMap::with_hasher(S::default()))
    }
}

impl<K, V, S> ConcurrentMap<K, V, S> {
    fn from_map(map: HashMap<K, V, S>) -> Self {
        Self {
            inner: RwLock::new(map),
            reentrancy: Reentrancy::new(),
        }
    }

    /// Direct access to the underlying map. No locking is needed since the
    /// borrow is exclusive.
    pub fn get_mut(&mut self) -> &mut HashMap<K, V, S> {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> HashMap<K, V, S> {
        self.inner.into_inner()
    }

    // Fair shared acquisition, unless this thread already holds the lock
    // through an open traversal: then waiting behind a queued writer would
    // deadlock, so join the held lock instead.
    fn read_shared(&self) -> RwLockReadGuard<'_, HashMap<K, V, S>> {
        if self.reentrancy.in_traversal() {
            self.inner.read_recursive()
        } else {
            self.inner.read()
        }
    }
}

impl<K, V, S> ConcurrentMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::from_map(HashMap::with_hasher(hasher))
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        log::trace!("creating map with capacity hint {}", capacity);
        Self::from_map(HashMap::with_capacity_and_hasher(capacity, hasher))
    }

    pub fn len(&self) -> usize {
        self.read_shared().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_shared().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.read_shared().capacity()
    }

    /// Return a copy of the value stored for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone,
    {
        self.read_shared().get(key).cloned()
    }

    /// Like [`get`](Self::get), but yields `V::default()` for absent keys.
    pub fn get_or_default<Q>(&self, key: &Q) -> V
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone + Default,
    {
        self.get(key).unwrap_or_default()
    }

    /// Apply `f` to the value stored for `key` while the shared lock is held.
    /// `f` counts as a traversal: it may read this map but must not write to
    /// it.
    pub fn get_with<Q, R, F>(&self, key: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        F: FnOnce(&V) -> R,
    {
        let map = self.read_shared();
        let _traversal = self.reentrancy.enter_traversal();
        map.get(key).map(f)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.read_shared().contains_key(key)
    }

    /// Insert or overwrite the value for `key`.
    pub fn set(&self, key: K, value: V) {
        // The displaced value is dropped after the lock is released.
        let _ = self.insert(key, value);
    }

    /// Insert or overwrite the value for `key`, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.reentrancy.check_write();
        self.inner.write().insert(key, value)
    }

    /// Remove the entry for `key`. Absent keys are a no-op.
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _ = self.remove(key);
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.reentrancy.check_write();
        self.inner.write().remove(key)
    }

    /// Remove every entry. Allocated capacity is kept and the map stays
    /// usable.
    pub fn clear(&self) {
        self.reentrancy.check_write();
        let mut map = self.inner.write();
        log::trace!("clearing {} entries", map.len());
        map.clear();
    }

    /// Insert every pair under a single exclusive acquisition, so readers see
    /// either none or all of the batch.
    pub fn extend<I>(&self, iter: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        // Pull the pairs before locking: the source iterator may run user code.
        let pairs: Vec<(K, V)> = iter.into_iter().collect();
        self.reentrancy.check_write();
        let mut map = self.inner.write();
        log::trace!("extending map with {} entries", pairs.len());
        map.extend(pairs);
    }

    /// Traverse the map, yielding copies of each entry.
    ///
    /// The shared lock is taken once here and released when the returned
    /// iterator is dropped: after exhaustion, an early `break`, or unwinding.
    /// Order is unspecified.
    pub fn iter(&self) -> Iter<'_, K, V, S>
    where
        K: Clone,
        V: Clone,
    {
        let guard = self.read_shared();
        let traversal = self.reentrancy.enter_traversal();
        // SAFETY: the raw iterator is stored next to the read guard that keeps
        // the table alive, and no writer can modify the table until that guard
        // is dropped.
        let raw = unsafe { guard.raw_table().iter() };
        Iter {
            raw,
            _guard: guard,
            _traversal: traversal,
        }
    }

    /// Visit every entry by reference under one shared acquisition, stopping
    /// at the first `ControlFlow::Break`.
    pub fn scan<B, F>(&self, mut f: F) -> ControlFlow<B>
    where
        F: FnMut(&K, &V) -> ControlFlow<B>,
    {
        let map = self.read_shared();
        let _traversal = self.reentrancy.enter_traversal();
        map.iter().try_for_each(|(k, v)| f(k, v))
    }

    /// Copy every entry out under the shared lock and release it before
    /// returning. The copy may be walked while writing to the map.
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let map = self.read_shared();
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Snapshot traversal over a `ConcurrentMap`, holding its shared lock.
pub struct Iter<'a, K, V, S> {
    raw: RawIter<(K, V)>,
    _guard: RwLockReadGuard<'a, HashMap<K, V, S>>,
    _traversal: TraversalGuard<'a>,
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S>
where
    K: Clone,
    V: Clone,
{
    type Item = (K, V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let bucket = self.raw.next()?;
        // SAFETY: the bucket belongs to the table pinned by `_guard`.
        let (k, v) = unsafe { bucket.as_ref() };
        Some((k.clone(), v.clone()))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.raw.size_hint()
    }
}

impl<'a, K: Clone, V: Clone, S> ExactSizeIterator for Iter<'a, K, V, S> {}

impl<'a, K: Clone, V: Clone, S> FusedIterator for Iter<'a, K, V, S> {}

impl<'a, K, V, S> fmt::Debug for Iter<'a, K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("remaining", &self.raw.len())
            .finish()
    }
}

impl<K, V, S> fmt::Debug for ConcurrentMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.read_shared().iter())
            .finish()
    }
}

impl<K, V, S> Clone for ConcurrentMap<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self::from_map(self.read_shared().clone())
    }
}

impl<K, V, S> From<HashMap<K, V, S>> for ConcurrentMap<K, V, S> {
    fn from(map: HashMap<K, V, S>) -> Self {
        Self::from_map(map)
    }
}

impl<K, V, S> FromIterator<(K, V)> for ConcurrentMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl<K, V, S> Extend<(K, V)> for ConcurrentMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.get_mut().extend(iter);
    }
}

impl<K, V, S> IntoIterator for ConcurrentMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = hashbrown::hash_map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_inner().into_iter()
    }
}
