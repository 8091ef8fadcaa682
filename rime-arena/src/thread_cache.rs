//! Per-thread cache of the serial arena last used by each thread.

use {
    crate::serial::SerialArena,
    std::{
        cell::Cell,
        ptr,
        sync::atomic::{AtomicU64, Ordering::Relaxed},
    },
};

static NEXT_THREAD_KEY: AtomicU64 = AtomicU64::new(1);
static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_KEY: u64 = NEXT_THREAD_KEY.fetch_add(1, Relaxed);

    /// The arena the current thread allocated from most recently,
    /// and its serial arena for this thread.
    static CACHE: Cell<(u64, *const SerialArena)> =
        const { Cell::new((0, ptr::null())) };
}

/// Identifies the current thread. Never zero.
pub (crate) fn thread_key() -> u64
{
    THREAD_KEY.with(|key| *key)
}

/// Fresh arena identity. Never zero, never reused.
///
/// Because identities are never reused, a cache entry
/// naming a dropped or reset arena can never match again.
pub (crate) fn next_arena_id() -> u64
{
    NEXT_ARENA_ID.fetch_add(1, Relaxed)
}

/// The current thread's serial arena for `arena_id`, if cached.
#[inline]
pub (crate) fn lookup(arena_id: u64) -> Option<*const SerialArena>
{
    let (id, serial) = CACHE.with(Cell::get);
    (id == arena_id).then_some(serial)
}

/// Remember the current thread's serial arena for `arena_id`.
pub (crate) fn store(arena_id: u64, serial: *const SerialArena)
{
    CACHE.with(|cache| cache.set((arena_id, serial)));
}
