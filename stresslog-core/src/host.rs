//! The hosting runtime, as the stress log sees it.
//!
//! The registry asks the host three questions: who is the current thread,
//! may this thread allocate right now, and is it one of the runtime's GC
//! threads (which get a larger per-thread budget).

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Queries the registry makes of the hosting runtime.
pub trait Host: Send + Sync {
    /// Identifier of the calling thread. Must be stable for the thread's
    /// lifetime and non-zero.
    fn current_thread_id(&self) -> u64;

    /// Whether the calling thread is inside a region where it must not
    /// allocate. Chunk and log allocation fail fast while this is true.
    fn in_cant_alloc_region(&self) -> bool;

    /// Whether the calling thread is a GC special thread.
    fn is_gc_special_thread(&self) -> bool {
        false
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    static CANT_ALLOC_DEPTH: Cell<u32> = const { Cell::new(0) };
    static GC_SPECIAL: Cell<bool> = const { Cell::new(false) };
}

/// Host backed by thread locals of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdHost;

impl StdHost {
    /// Mark (or unmark) the calling thread as a GC special thread.
    pub fn set_gc_special_thread(special: bool) {
        GC_SPECIAL.with(|flag| flag.set(special));
    }
}

impl Host for StdHost {
    fn current_thread_id(&self) -> u64 {
        THREAD_ID.with(|id| *id)
    }

    fn in_cant_alloc_region(&self) -> bool {
        CANT_ALLOC_DEPTH.with(|depth| depth.get() > 0)
    }

    fn is_gc_special_thread(&self) -> bool {
        GC_SPECIAL.with(|flag| flag.get())
    }
}

/// Marks the calling thread as unable to allocate until dropped.
///
/// Guards nest. Not `Send`: it must be dropped on the thread that made it.
#[derive(Debug)]
#[must_use = "the region ends when the guard is dropped"]
pub struct CantAllocRegion {
    _not_send: PhantomData<*const ()>,
}

impl CantAllocRegion {
    /// Enter a no-allocation region on the calling thread.
    pub fn enter() -> Self {
        CANT_ALLOC_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for CantAllocRegion {
    fn drop(&mut self) {
        CANT_ALLOC_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
