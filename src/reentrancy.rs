//! Per-thread traversal tracker.
//!
//! A traversal of `ConcurrentMap` holds the shared lock until it is dropped,
//! and the lock is not reentrant. The tracker records, per thread, which maps
//! have a traversal open so that:
//! - point reads issued from inside a traversal can take the shared lock
//!   recursively instead of queueing behind a waiting writer, while every
//!   other read stays fair to writers;
//! - in debug builds, a write issued from inside the writer's own traversal
//!   panics instead of deadlocking. Release builds skip that check.

use core::cell::RefCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::HashMap;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    // Open traversal count per tracker id on this thread.
    static OPEN: RefCell<HashMap<u64, u32>> = RefCell::new(HashMap::new());
}

/// Per-map traversal tracker. Embed this in structs and guard traversals with
/// `let _t = self.reentrancy.enter_traversal();`, writers with
/// `self.reentrancy.check_write();`.
#[derive(Debug)]
pub struct Reentrancy {
    id: u64,
}

impl Reentrancy {
    pub fn new() -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Record an open traversal on the current thread until the returned
    /// guard is dropped.
    #[inline]
    pub fn enter_traversal(&self) -> TraversalGuard<'_> {
        OPEN.with(|open| *open.borrow_mut().entry(self.id).or_insert(0) += 1);
        TraversalGuard {
            owner: self,
            _nosend: PhantomData,
        }
    }

    /// Number of traversals the current thread has open on this tracker.
    #[inline]
    pub fn depth(&self) -> u32 {
        OPEN.with(|open| open.borrow().get(&self.id).copied().unwrap_or(0))
    }

    #[inline]
    pub fn in_traversal(&self) -> bool {
        self.depth() > 0
    }

    /// Panics in debug builds if the current thread has a traversal open.
    /// Must be called before the write lock is requested.
    #[inline]
    pub fn check_write(&self) {
        #[cfg(debug_assertions)]
        {
            let depth = self.depth();
            if depth > 0 {
                log::error!(
                    "write requested on {:?} with {} traversal(s) of the same map open",
                    std::thread::current().id(),
                    depth
                );
                panic!("reentrancy detected: write to map from inside its own traversal");
            }
        }
    }
}

impl Default for Reentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `Reentrancy::enter_traversal`.
pub struct TraversalGuard<'a> {
    owner: &'a Reentrancy,
    // Released on the thread that recorded it.
    _nosend: PhantomData<*mut ()>,
}

impl<'a> Drop for TraversalGuard<'a> {
    fn drop(&mut self) {
        let id = self.owner.id;
        // The thread-local may already be gone during thread teardown.
        let _ = OPEN.try_with(|open| {
            let mut open = open.borrow_mut();
            if let Some(d) = open.get_mut(&id) {
                debug_assert!(*d > 0);
                *d -= 1;
                if *d == 0 {
                    open.remove(&id);
                }
            }
        });
    }
}
