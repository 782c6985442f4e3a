//! Hazard-pointer domains.
//!
//! A [`Domain`] is an instance-scoped reclamation unit: the structure that
//! owns it (typically one map) retires unlinked nodes into it, and readers
//! publish the pointers they are about to dereference in its hazard slots.
//! Domains are independent; nothing is process-global, so any number of
//! maps with their own domains can coexist.
//!
//! The protocol is the classic scan-based discipline:
//!
//! 1. A reader publishes a pointer in one of its slots, then re-reads the
//!    source location. If the re-read still yields the pointer, no reclaimer
//!    can free it until the slot is cleared or overwritten.
//! 2. A writer that unlinks a node retires it to its thread-local list
//!    instead of freeing it.
//! 3. When the list crosses the scan threshold, the thread snapshots every
//!    published hazard in the domain and frees exactly the retired entries
//!    the snapshot does not contain.

use core::cell::RefCell;
use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::retired::Retired;
use crate::slot::{
    SlotTable, ThreadRecord, DEFAULT_MAX_THREADS, MIN_SCAN_THRESHOLD, SLOTS_PER_THREAD,
};
use crate::spin::SpinLock;
use crate::Error;

/// Monotonic id source so thread-local registrations can tell domains apart.
static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(0);

/// Shared domain state, kept behind an `Arc` so a thread's exit cleanup can
/// reach it even when the owning structure is being torn down elsewhere.
pub(crate) struct Shared {
    id: u64,
    table: SlotTable,
    /// Retired lists handed back by exited threads; swept into the scanning
    /// thread's list on the next reclaim, or freed at teardown.
    drain: SpinLock<Vec<Retired>>,
    scan_threshold: usize,
}

impl Shared {
    /// Snapshot every published hazard below the watermark.
    fn protected_set(&self) -> Vec<*mut u8> {
        // Pairs with the SeqCst publish stores: everything published before
        // this point is visible to the loads below.
        fence(Ordering::SeqCst);
        let watermark = self.table.watermark();
        let mut protected = Vec::with_capacity(watermark * SLOTS_PER_THREAD);
        for index in 0..watermark {
            for slot in &self.table.record(index).slots {
                let ptr = slot.load();
                if !ptr.is_null() {
                    protected.push(ptr);
                }
            }
        }
        protected.sort_unstable();
        protected.dedup();
        protected
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Teardown: caller invariant that no thread still dereferences
        // anything retired here, so everything left is freed unconditionally.
        for record in self.table.records_mut() {
            for entry in record.retired.get_mut().drain(..) {
                unsafe { entry.free() };
            }
        }
        for entry in self.drain.get_mut().drain(..) {
            unsafe { entry.free() };
        }
    }
}

/// A per-thread claim on one domain's slot-table index.
///
/// Lives in thread-local storage; dropping it (on thread exit) clears the
/// thread's hazard slots, hands its retired list to the domain's drain list,
/// and recycles the index.
struct Registration {
    domain_id: u64,
    index: usize,
    shared: Weak<Shared>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            // Domain already gone; its teardown freed our retired entries.
            return;
        };
        let record = shared.table.record(self.index);
        for slot in &record.slots {
            slot.clear();
        }
        // SAFETY: we are the owning thread of this record until free_index
        // below publishes it for recycling.
        let retired = unsafe { &mut *record.retired.get() };
        if !retired.is_empty() {
            shared.drain.lock().append(retired);
        }
        shared.table.free_index(self.index);
    }
}

thread_local! {
    static REGISTRY: RefCell<Vec<Registration>> = const { RefCell::new(Vec::new()) };
}

/// An instance-scoped hazard-pointer domain.
///
/// # Example
///
/// ```
/// use karst::Domain;
///
/// let domain = Domain::new();
/// let handle = domain.enter().unwrap();
///
/// let ptr = Box::into_raw(Box::new(7_u64));
/// handle.protect(0, ptr);
/// // ... dereference ptr, knowing no scan will free it ...
/// handle.clear(0);
/// unsafe { handle.retire(ptr) };
/// ```
pub struct Domain {
    shared: Arc<Shared>,
}

impl Domain {
    /// A domain admitting [`DEFAULT_MAX_THREADS`] concurrent threads.
    pub fn new() -> Self {
        Self::with_max_threads(DEFAULT_MAX_THREADS)
    }

    /// A domain admitting at most `max_threads` concurrently registered
    /// threads. The scan threshold scales with the worst-case number of
    /// published hazards so a scan always finds something to free.
    pub fn with_max_threads(max_threads: usize) -> Self {
        let scan_threshold = (2 * max_threads * SLOTS_PER_THREAD).max(MIN_SCAN_THRESHOLD);
        Self {
            shared: Arc::new(Shared {
                id: NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed),
                table: SlotTable::new(max_threads),
                drain: SpinLock::new(Vec::new()),
                scan_threshold,
            }),
        }
    }

    /// Maximum number of concurrently registered threads.
    #[inline]
    pub fn max_threads(&self) -> usize {
        self.shared.table.max_threads()
    }

    /// Retired-list length at which a thread-local scan is forced.
    #[inline]
    pub fn scan_threshold(&self) -> usize {
        self.shared.scan_threshold
    }

    /// Register the calling thread (first use only) and borrow its hazard
    /// slots. Fails with [`Error::ThreadLimit`] when the table is full.
    pub fn enter(&self) -> Result<LocalHandle<'_>, Error> {
        let index = REGISTRY.with(|registry| {
            let mut registrations = registry.borrow_mut();
            registrations.retain(|r| r.shared.strong_count() > 0);
            if let Some(r) = registrations.iter().find(|r| r.domain_id == self.shared.id) {
                return Ok(r.index);
            }
            let index = self.shared.table.alloc_index().ok_or(Error::ThreadLimit {
                max_threads: self.shared.table.max_threads(),
            })?;
            registrations.push(Registration {
                domain_id: self.shared.id,
                index,
                shared: Arc::downgrade(&self.shared),
            });
            Ok(index)
        })?;
        Ok(LocalHandle {
            shared: &self.shared,
            record: self.shared.table.record(index),
            index,
            _not_send: PhantomData,
        })
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("max_threads", &self.shared.table.max_threads())
            .field("scan_threshold", &self.shared.scan_threshold)
            .finish()
    }
}

/// The calling thread's view of a domain: its hazard slots and retired list.
///
/// Not `Send`: the slot index belongs to the thread that entered.
pub struct LocalHandle<'d> {
    shared: &'d Arc<Shared>,
    record: &'d ThreadRecord,
    index: usize,
    _not_send: PhantomData<*mut ()>,
}

impl LocalHandle<'_> {
    /// Publish `ptr` in hazard slot `slot`.
    ///
    /// After this returns, re-read the location `ptr` was loaded from; only
    /// if the re-read still yields `ptr` may it be dereferenced. Panics if
    /// `slot >= SLOTS_PER_THREAD`.
    #[inline]
    pub fn protect<T>(&self, slot: usize, ptr: *mut T) {
        self.record.slots[slot].protect(ptr as *mut u8);
    }

    /// Publish null in hazard slot `slot`.
    #[inline]
    pub fn clear(&self, slot: usize) {
        self.record.slots[slot].clear();
    }

    /// Hand an unlinked pointer to the domain for deferred deletion.
    ///
    /// Crossing the scan threshold triggers [`reclaim`](Self::reclaim) on
    /// this thread.
    ///
    /// # Safety
    ///
    /// - `ptr` must come from `Box::into_raw` and must no longer be
    ///   reachable from any shared location.
    /// - `ptr` must not be retired more than once.
    /// - The caller must not use `ptr` after this call.
    pub unsafe fn retire<T: Send + 'static>(&self, ptr: *mut T) {
        let should_scan = {
            // SAFETY: owner-only access to this record's retired list; the
            // borrow ends before reclaim takes its own.
            let retired = unsafe { &mut *self.record.retired.get() };
            retired.push(unsafe { Retired::new(ptr, self.index) });
            retired.len() >= self.shared.scan_threshold
        };
        if should_scan {
            self.reclaim();
        }
    }

    /// Scan every hazard slot and free the calling thread's retired entries
    /// that no slot protects; protected entries stay on the list.
    ///
    /// Also sweeps the domain's drain list (retired entries left behind by
    /// exited threads) into this thread's list first, so nothing is stranded.
    pub fn reclaim(&self) {
        // Take the list out before freeing anything: a destructor is allowed
        // to retire into this domain again, which needs the cell back.
        let entries = {
            // SAFETY: owner-only access to this record's retired list.
            let retired = unsafe { &mut *self.record.retired.get() };
            {
                let mut drain = self.shared.drain.lock();
                if !drain.is_empty() {
                    retired.append(&mut drain);
                }
            }
            if retired.is_empty() {
                return;
            }
            core::mem::take(retired)
        };
        let protected = self.shared.protected_set();
        let mut kept = Vec::new();
        for entry in entries {
            if protected.binary_search(&entry.ptr).is_ok() {
                kept.push(entry);
            } else {
                // SAFETY: no slot holds this address; freed exactly once.
                unsafe { entry.free() };
            }
        }
        if !kept.is_empty() {
            // SAFETY: owner-only access, re-taken after the frees above.
            let retired = unsafe { &mut *self.record.retired.get() };
            retired.append(&mut kept);
        }
    }

    /// Number of entries on this thread's retired list.
    pub fn pending(&self) -> usize {
        // SAFETY: owner-only access to this record's retired list.
        unsafe { &*self.record.retired.get() }.len()
    }
}
