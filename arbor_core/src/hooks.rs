use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory hooks consulted for every owned allocation a [`Document`] makes.
///
/// Nodes, owned strings and keys, child lists and print buffers are all
/// reported here before they are materialized. Returning `false` from
/// [`alloc`](MemoryHooks::alloc) or [`realloc`](MemoryHooks::realloc) makes the
/// calling operation fail with [`TreeError::AllocationFailure`] and roll back.
///
/// Hooks are bound to a document when it is created, so every byte a document
/// reports is released through the same hooks that granted it.
///
/// [`Document`]: crate::document::Document
/// [`TreeError::AllocationFailure`]: crate::error::TreeError::AllocationFailure
pub trait MemoryHooks: Send + Sync + Debug {
    /// Requests `size` bytes. Returns `false` to refuse the allocation.
    fn alloc(&self, size: usize) -> bool;

    /// Returns `size` bytes previously granted by `alloc` or `realloc`.
    fn free(&self, size: usize);

    /// Resizes a grant from `old_size` to `new_size` bytes.
    ///
    /// The default behaves like allocate-copy-free: the new block is requested
    /// first and the old one is only returned once that succeeded.
    fn realloc(&self, old_size: usize, new_size: usize) -> bool {
        if !self.alloc(new_size) {
            return false;
        }
        self.free(old_size);
        true
    }
}

/// Hooks that grant every request. The default for new documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHooks;

impl MemoryHooks for SystemHooks {
    fn alloc(&self, _size: usize) -> bool {
        true
    }

    fn free(&self, _size: usize) {}

    fn realloc(&self, _old_size: usize, _new_size: usize) -> bool {
        true
    }
}

/// Hooks that grant every request and keep byte and call counters.
///
/// `live_bytes() == 0` once every tree of a document has been deleted is the
/// leak check used throughout the test suite.
#[derive(Debug, Default)]
pub struct TrackingHooks {
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    allocations: AtomicUsize,
    frees: AtomicUsize,
}

impl TrackingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently granted and not yet freed.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Highest value `live_bytes` has reached.
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }

    /// Number of successful `alloc` calls, including the allocating half of `realloc`.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Relaxed)
    }

    fn grant(&self, size: usize) {
        let live = self.live_bytes.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_bytes.fetch_max(live, Ordering::Relaxed);
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }
}

impl MemoryHooks for TrackingHooks {
    fn alloc(&self, size: usize) -> bool {
        self.grant(size);
        true
    }

    fn free(&self, size: usize) {
        self.live_bytes.fetch_sub(size, Ordering::Relaxed);
        self.frees.fetch_add(1, Ordering::Relaxed);
    }
}

/// Tracking hooks that grant a fixed number of allocations and refuse the rest.
///
/// Used to drive each operation through every one of its out-of-memory paths.
#[derive(Debug)]
pub struct FailingHooks {
    remaining: AtomicUsize,
    tracking: TrackingHooks,
}

impl FailingHooks {
    /// Grants the first `grants` allocations, then refuses every later one.
    pub fn new(grants: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(grants),
            tracking: TrackingHooks::new(),
        }
    }

    pub fn live_bytes(&self) -> usize {
        self.tracking.live_bytes()
    }

    /// Whether at least one allocation has been refused.
    pub fn exhausted(&self) -> bool {
        self.remaining.load(Ordering::Relaxed) == 0
    }
}

impl MemoryHooks for FailingHooks {
    fn alloc(&self, size: usize) -> bool {
        let granted = self
            .remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if granted {
            self.tracking.alloc(size);
        }
        granted
    }

    fn free(&self, size: usize) {
        self.tracking.free(size);
    }
}
