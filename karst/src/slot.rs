//! Hazard slots and the per-domain thread registry.
//!
//! Each registered thread owns one `ThreadRecord` in a dense table sized at
//! domain construction: a fixed pair of hazard slots plus the thread's
//! retired list. Slots are written only by their owning thread and read by
//! any thread running a reclamation scan. Indices are handed out by atomic
//! increment and recycled through a spinlock-guarded free list when a thread
//! exits.

use core::cell::UnsafeCell;
use core::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};

use crate::retired::Retired;
use crate::spin::SpinLock;

/// Hazard slots per registered thread. Two suffice for the chain walks the
/// map performs: predecessor and current.
pub const SLOTS_PER_THREAD: usize = 2;

/// Default maximum number of concurrently registered threads.
pub const DEFAULT_MAX_THREADS: usize = 128;

/// Floor for the retired-list length that triggers a reclamation scan.
pub(crate) const MIN_SCAN_THRESHOLD: usize = 100;

/// A single published-pointer cell.
///
/// Holds null while idle. A non-null value is an address the owning thread
/// is about to dereference; reclamation scans must not free it.
pub(crate) struct HazardSlot {
    ptr: AtomicPtr<u8>,
}

impl HazardSlot {
    const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Publish `ptr`. The store pairs with the SeqCst fence at the start of
    /// a scan: either the scan sees this publish, or the trailing fence
    /// orders the caller's re-read after the unlink that preceded the scan,
    /// making the re-read fail.
    #[inline]
    pub(crate) fn protect(&self, ptr: *mut u8) {
        self.ptr.store(ptr, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn clear(&self) {
        self.ptr.store(core::ptr::null_mut(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn load(&self) -> *mut u8 {
        self.ptr.load(Ordering::Acquire)
    }
}

/// Per-thread state: hazard slots plus the retired list.
///
/// Padded to its own cache line so one thread's publish stores do not
/// invalidate a neighbor's slots.
#[repr(align(128))]
pub(crate) struct ThreadRecord {
    pub(crate) slots: [HazardSlot; SLOTS_PER_THREAD],
    /// Owner-only. Written by the thread holding this record's index, or
    /// under exclusive access at domain teardown. The index hand-off through
    /// the free-list lock orders a departing owner's writes before the next
    /// owner's reads.
    pub(crate) retired: UnsafeCell<Vec<Retired>>,
}

impl ThreadRecord {
    fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| HazardSlot::new()),
            retired: UnsafeCell::new(Vec::new()),
        }
    }
}

// SAFETY: slots are atomics; the retired cell is confined to the owning
// thread per the invariant documented on the field.
unsafe impl Send for ThreadRecord {}
unsafe impl Sync for ThreadRecord {}

/// Dense table of thread records with index allocation and recycling.
pub(crate) struct SlotTable {
    records: Box<[ThreadRecord]>,
    /// Next never-used index. Indices below this watermark may be live or
    /// recycled; indices at or above it have never been handed out.
    next_index: AtomicUsize,
    /// Recycled indices from exited threads.
    free_indices: SpinLock<Vec<usize>>,
}

impl SlotTable {
    pub(crate) fn new(max_threads: usize) -> Self {
        let mut records = Vec::with_capacity(max_threads);
        for _ in 0..max_threads {
            records.push(ThreadRecord::new());
        }
        Self {
            records: records.into_boxed_slice(),
            next_index: AtomicUsize::new(0),
            free_indices: SpinLock::new(Vec::new()),
        }
    }

    #[inline]
    pub(crate) fn max_threads(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub(crate) fn record(&self, index: usize) -> &ThreadRecord {
        &self.records[index]
    }

    /// Indices that have ever been handed out; scans only look this far.
    #[inline]
    pub(crate) fn watermark(&self) -> usize {
        self.next_index.load(Ordering::Acquire).min(self.records.len())
    }

    /// Claim a stable index for the calling thread, recycled first.
    /// Returns `None` when the table is full.
    pub(crate) fn alloc_index(&self) -> Option<usize> {
        {
            let mut free = self.free_indices.lock();
            if let Some(index) = free.pop() {
                return Some(index);
            }
        }
        // CAS loop: only increment on success so a full table stays full
        // instead of wrapping past the record count.
        loop {
            let current = self.next_index.load(Ordering::Relaxed);
            if current >= self.records.len() {
                return None;
            }
            match self.next_index.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(current),
                Err(_) => continue,
            }
        }
    }

    /// Return an index for recycling. The caller must already have cleared
    /// the record's hazard slots and drained its retired list.
    pub(crate) fn free_index(&self, index: usize) {
        let mut free = self.free_indices.lock();
        free.push(index);
    }

    pub(crate) fn records_mut(&mut self) -> &mut [ThreadRecord] {
        &mut self.records
    }
}
