//! rw-hashmap: a generic hash map that is safe for concurrent use, built on a
//! single reader/writer lock.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: plain map semantics (unique keys, overwrite on insert) where every
//!   operation is atomic with respect to every other, without exposing the
//!   lock to callers.
//! - Layers:
//!   - ConcurrentMap<K, V, S>: a `hashbrown::HashMap` behind one
//!     `parking_lot::RwLock`. Reads take the lock shared, writes take it
//!     exclusively, and each acquisition spans exactly one operation.
//!   - Reentrancy: a per-thread record of open traversals, used to pick the
//!     lock mode for reads and, in debug builds, to catch writes issued from
//!     inside the writer's own traversal.
//!
//! Constraints
//! - `Send + Sync` whenever the key, value and hasher are.
//! - No sharding: `len()` and traversals see the whole map at one instant.
//! - Lock acquisition cannot fail (no poisoning) and there are no timeouts.
//!   Waiting only ever comes from lock contention.
//!
//! Traversal
//! - `iter()` takes the shared lock once and the returned iterator owns the
//!   guard, so the lock is released exactly once when the iterator is dropped:
//!   after exhaustion, an early `break`, or unwinding from a panicking
//!   consumer. Writers block for the whole traversal, which therefore sees a
//!   single consistent snapshot.
//! - The iterator walks the table through hashbrown's raw API. It yields
//!   clones because the lock guard, and with it any borrow, ends when the
//!   iterator is dropped.
//! - `scan()` is the by-reference form with early exit through
//!   `ControlFlow`. `snapshot()` copies everything out and releases the lock
//!   before returning, so the caller may write while walking the copy.
//!
//! Reentrancy policy
//! - The lock is not reentrant. A write from inside an open `iter()`/`scan()`
//!   on the same thread deadlocks in release builds and panics in debug
//!   builds.
//! - Shared acquisitions are fair: they queue behind a waiting writer, so a
//!   stream of overlapping readers cannot starve writers.
//! - A read issued on a thread that already has a traversal of the same map
//!   open (`iter()`, `scan()`, or the closure of `get_with()`) joins the held
//!   lock recursively instead, so it cannot deadlock behind a queued writer.
//!   This covers point reads and nested traversals alike.
//! - Values displaced by `set`/`insert`/`delete`/`remove` are dropped after
//!   the lock is released.
//!
//! Notes and non-goals
//! - Iteration order is unspecified.
//! - No "wait until present" lookups and no serialization.

mod concurrent_map;
mod reentrancy;

// Public surface
pub use concurrent_map::{ConcurrentMap, Iter};
