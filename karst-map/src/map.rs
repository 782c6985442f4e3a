//! Lock-free separate-chaining hash map.
//!
//! # Architecture
//!
//! - **Buckets**: a fixed array of atomic head links, sized at construction.
//! - **Nodes**: singly linked chains; each node stores its value behind an
//!   atomic pointer so overwrites swap the pointer and readers always see a
//!   consistent snapshot.
//! - **Removal**: two compare-and-swaps. Mark the victim's `next` (logical
//!   deletion), then swing the predecessor link past it. Every unlink
//!   expects an unmarked predecessor link, so a predecessor that is itself
//!   being removed makes the unlink fail and retry.
//! - **Reclamation**: unlinked nodes and replaced value boxes are retired to
//!   a per-map hazard-pointer domain; walks publish the nodes they are about
//!   to dereference, so nothing is freed out from under a reader.
//!
//! Duplicate keys are resolved best-effort: insert walks the chain and
//! overwrites the first live match, else prepends at the head. Two inserts
//! of the same key racing past each other's walk can both end up in the
//! chain; lookups then return the most recently linked node (the one nearer
//! the head).

use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;
use foldhash::fast::FixedState;
use karst::{Domain, LocalHandle};

use crate::error::MapError;
use crate::tagged;

/// Bucket count used by [`LockFreeMap::new`].
pub const DEFAULT_BUCKET_COUNT: usize = 16;

/// Hazard slot roles during a chain walk.
const SLOT_PRED: usize = 0;
const SLOT_CUR: usize = 1;

/// Outcome of [`LockFreeMap::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// The key was not present; a new node was linked.
    Added,
    /// An existing node's value was overwritten.
    Updated,
}

/// Chain node. `next` is a tagged link (see [`crate::tagged`]); `value` is
/// an owning pointer swapped wholesale on overwrite.
struct Node<K, V> {
    key: K,
    value: AtomicPtr<V>,
    next: AtomicUsize,
}

impl<K, V> Drop for Node<K, V> {
    fn drop(&mut self) {
        let value = *self.value.get_mut();
        if !value.is_null() {
            // SAFETY: the node owns its current value box exclusively once
            // the node itself is being freed.
            unsafe { drop(Box::from_raw(value)) };
        }
    }
}

/// A live match produced by a chain walk. The node is protected in
/// `SLOT_CUR`, its predecessor (when one exists) in `SLOT_PRED`, for as long
/// as the slots stay unchanged.
struct Hit<'m, K, V> {
    /// The link that pointed at `node` when the walk validated it: either
    /// the bucket head or the predecessor's `next`.
    prev_link: &'m AtomicUsize,
    node: *mut Node<K, V>,
    /// The unmarked `next` link observed on `node`.
    next: usize,
}

/// Concurrent hash map with a fixed bucket count and lock-free
/// insert/get/remove.
///
/// # Example
///
/// ```
/// use karst_map::LockFreeMap;
///
/// let map = LockFreeMap::new();
/// map.insert("apple", 1).unwrap();
/// assert_eq!(map.get("apple").unwrap(), Some(1));
/// assert!(map.remove("apple").unwrap());
/// assert_eq!(map.get("apple").unwrap(), None);
/// ```
pub struct LockFreeMap<K, V, S = FixedState> {
    buckets: Box<[AtomicUsize]>,
    hasher: S,
    domain: Domain,
    // Chains are reachable only through the tagged links above; this records
    // that the map owns its nodes.
    marker: PhantomData<Box<Node<K, V>>>,
}

impl<K, V, S> core::fmt::Debug for LockFreeMap<K, V, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockFreeMap")
            .field("buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

impl<K, V> LockFreeMap<K, V, FixedState> {
    /// An empty map with [`DEFAULT_BUCKET_COUNT`] buckets.
    pub fn new() -> Self {
        Self::build(DEFAULT_BUCKET_COUNT, FixedState::default())
    }

    /// An empty map with exactly `buckets` chains. Fails with
    /// [`MapError::ZeroBuckets`] when `buckets` is zero; the count is fixed
    /// for the lifetime of the map.
    pub fn with_buckets(buckets: usize) -> Result<Self, MapError> {
        Self::with_buckets_and_hasher(buckets, FixedState::default())
    }
}

impl<K, V> Default for LockFreeMap<K, V, FixedState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> LockFreeMap<K, V, S> {
    /// An empty map with a caller-supplied hasher. The hasher must be
    /// deterministic for the lifetime of each key value.
    pub fn with_buckets_and_hasher(buckets: usize, hasher: S) -> Result<Self, MapError> {
        if buckets == 0 {
            return Err(MapError::ZeroBuckets);
        }
        Ok(Self::build(buckets, hasher))
    }

    fn build(buckets: usize, hasher: S) -> Self {
        let mut heads = Vec::with_capacity(buckets);
        for _ in 0..buckets {
            heads.push(AtomicUsize::new(0));
        }
        Self {
            buckets: heads.into_boxed_slice(),
            hasher,
            domain: Domain::new(),
            marker: PhantomData,
        }
    }

    /// Number of buckets. Constant after construction, no synchronization.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop every entry. Exclusive access means no walk is in flight, so
    /// chains are freed directly instead of going through retirement.
    pub fn clear(&mut self) {
        for head in self.buckets.iter_mut() {
            let mut link = tagged::without_mark(*head.get_mut());
            *head.get_mut() = 0;
            while link != 0 {
                let mut node = unsafe { Box::from_raw(link as *mut Node<K, V>) };
                link = tagged::without_mark(*node.next.get_mut());
            }
        }
    }
}

impl<K, V, S> LockFreeMap<K, V, S>
where
    K: Hash + Eq + Send + 'static,
    V: Send + 'static,
    S: BuildHasher,
{
    #[inline]
    fn bucket_head<Q>(&self, key: &Q) -> &AtomicUsize
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        let hash = self.hasher.hash_one(key);
        &self.buckets[(hash as usize) % self.buckets.len()]
    }

    /// Walk the chain rooted at `head` for the first live node matching
    /// `key`.
    ///
    /// The walk publishes the current node in `SLOT_CUR` and the
    /// predecessor in `SLOT_PRED`, re-reading the incoming link after each
    /// publish; a mismatch restarts from the head. Marked nodes encountered
    /// on the way are unlinked, and whichever thread wins an unlink retires
    /// the node.
    fn find<'m, Q>(
        &'m self,
        handle: &LocalHandle<'_>,
        head: &'m AtomicUsize,
        key: &Q,
    ) -> Option<Hit<'m, K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let backoff = Backoff::new();
        'restart: loop {
            let mut prev_link = head;
            let mut cur_addr = prev_link.load(Ordering::Acquire);
            loop {
                if cur_addr == 0 {
                    return None;
                }
                let cur = cur_addr as *mut Node<K, V>;
                handle.protect(SLOT_CUR, cur);
                if prev_link.load(Ordering::Acquire) != cur_addr {
                    backoff.spin();
                    continue 'restart;
                }
                let next = unsafe { (*cur).next.load(Ordering::Acquire) };
                if tagged::is_marked(next) {
                    // Logically gone; unlink before moving past it.
                    match prev_link.compare_exchange(
                        cur_addr,
                        tagged::without_mark(next),
                        Ordering::Release,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            // SAFETY: the unlink made `cur` unreachable and
                            // only one thread can win that CAS.
                            unsafe { handle.retire(cur) };
                            cur_addr = tagged::without_mark(next);
                            continue;
                        }
                        Err(_) => {
                            backoff.spin();
                            continue 'restart;
                        }
                    }
                }
                if unsafe { (*cur).key.borrow() } == key {
                    return Some(Hit {
                        prev_link,
                        node: cur,
                        next,
                    });
                }
                handle.protect(SLOT_PRED, cur);
                prev_link = unsafe { &(*cur).next };
                cur_addr = next;
            }
        }
    }

    /// Walk the chain until `target` (already marked by the caller) is no
    /// longer reachable, unlinking every marked node on the way. Called when
    /// the remover's own unlink lost its race.
    fn unlink_marked(&self, handle: &LocalHandle<'_>, head: &AtomicUsize, target: *mut Node<K, V>) {
        let backoff = Backoff::new();
        'restart: loop {
            let mut prev_link = head;
            let mut cur_addr = prev_link.load(Ordering::Acquire);
            loop {
                if cur_addr == 0 {
                    return;
                }
                let cur = cur_addr as *mut Node<K, V>;
                handle.protect(SLOT_CUR, cur);
                if prev_link.load(Ordering::Acquire) != cur_addr {
                    backoff.spin();
                    continue 'restart;
                }
                let next = unsafe { (*cur).next.load(Ordering::Acquire) };
                if tagged::is_marked(next) {
                    match prev_link.compare_exchange(
                        cur_addr,
                        tagged::without_mark(next),
                        Ordering::Release,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            unsafe { handle.retire(cur) };
                            if cur == target {
                                return;
                            }
                            cur_addr = tagged::without_mark(next);
                            continue;
                        }
                        Err(_) => {
                            backoff.spin();
                            continue 'restart;
                        }
                    }
                }
                handle.protect(SLOT_PRED, cur);
                prev_link = unsafe { &(*cur).next };
                cur_addr = next;
            }
        }
    }

    /// Insert `value` under `key`.
    ///
    /// Walks the chain first: the first live node with an equal key has its
    /// value overwritten ([`Insert::Updated`]); otherwise a new node is
    /// prepended at the bucket head ([`Insert::Added`]).
    pub fn insert(&self, key: K, value: V) -> Result<Insert, MapError> {
        let handle = self.domain.enter()?;
        let head = self.bucket_head(&key);
        let node = Box::into_raw(Box::new(Node {
            key,
            value: AtomicPtr::new(Box::into_raw(Box::new(value))),
            next: AtomicUsize::new(0),
        }));
        let backoff = Backoff::new();
        let outcome = loop {
            let found = self.find(&handle, head, unsafe { &(*node).key });
            match found {
                Some(hit) => {
                    // Move our value box into the existing node and retire
                    // the one it held. This races safely with a removal of
                    // `hit.node`: if the remover's mark lands before the
                    // swap, every subsequent walk skips the node, so no
                    // reader observes the new box and the update linearizes
                    // immediately before the remove. If the swap lands
                    // first, readers that still reach the node see the new
                    // box, linearizing the update before the remove as
                    // well. Either way the node's destructor frees
                    // whichever box it holds when the node is reclaimed.
                    let fresh = unsafe { (*node).value.swap(ptr::null_mut(), Ordering::Relaxed) };
                    let old = unsafe { (*hit.node).value.swap(fresh, Ordering::AcqRel) };
                    // SAFETY: the swap took `old` out of the only shared
                    // location holding it.
                    unsafe { handle.retire(old) };
                    // The spare node was never published; value already
                    // taken, so this only frees the shell and the key.
                    drop(unsafe { Box::from_raw(node) });
                    break Insert::Updated;
                }
                None => {
                    let observed = head.load(Ordering::Acquire);
                    unsafe { (*node).next.store(observed, Ordering::Relaxed) };
                    match head.compare_exchange(
                        observed,
                        node as usize,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break Insert::Added,
                        Err(_) => {
                            backoff.spin();
                            continue;
                        }
                    }
                }
            }
        };
        handle.clear(SLOT_CUR);
        handle.clear(SLOT_PRED);
        Ok(outcome)
    }

    /// Look up `key`, returning a snapshot of its value.
    pub fn get<Q>(&self, key: &Q) -> Result<Option<V>, MapError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let handle = self.domain.enter()?;
        let head = self.bucket_head(key);
        let value = match self.find(&handle, head, key) {
            None => None,
            Some(hit) => {
                // The node stays protected in SLOT_CUR; the value box needs
                // its own publish/re-read round because an overwrite may
                // retire it at any moment.
                let backoff = Backoff::new();
                loop {
                    let vptr = unsafe { (*hit.node).value.load(Ordering::Acquire) };
                    handle.protect(SLOT_PRED, vptr);
                    if unsafe { (*hit.node).value.load(Ordering::Acquire) } != vptr {
                        backoff.spin();
                        continue;
                    }
                    break Some(unsafe { (*vptr).clone() });
                }
            }
        };
        handle.clear(SLOT_CUR);
        handle.clear(SLOT_PRED);
        Ok(value)
    }

    /// Whether `key` has a live entry.
    pub fn contains_key<Q>(&self, key: &Q) -> Result<bool, MapError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let handle = self.domain.enter()?;
        let head = self.bucket_head(key);
        let found = self.find(&handle, head, key).is_some();
        handle.clear(SLOT_CUR);
        handle.clear(SLOT_PRED);
        Ok(found)
    }

    /// Remove the first live entry for `key`.
    ///
    /// Returns `true` if this call unlinked a node, `false` if no live
    /// entry existed at the linearization point.
    pub fn remove<Q>(&self, key: &Q) -> Result<bool, MapError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let handle = self.domain.enter()?;
        let head = self.bucket_head(key);
        let backoff = Backoff::new();
        let removed = loop {
            let Some(hit) = self.find(&handle, head, key) else {
                break false;
            };
            // Logical deletion: mark the victim's own link. Exactly one
            // remover wins this CAS per node.
            if unsafe {
                (*hit.node).next.compare_exchange(
                    hit.next,
                    tagged::with_mark(hit.next),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
            }
            .is_err()
            {
                // Someone marked it first or the chain moved; re-walk.
                backoff.spin();
                continue;
            }
            // Physical unlink. The winner of this CAS (us or a helping
            // walk) retires the node.
            if hit
                .prev_link
                .compare_exchange(
                    hit.node as usize,
                    hit.next,
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                // SAFETY: unlinked by the CAS above, exactly once.
                unsafe { handle.retire(hit.node) };
            } else {
                self.unlink_marked(&handle, head, hit.node);
            }
            break true;
        };
        handle.clear(SLOT_CUR);
        handle.clear(SLOT_PRED);
        Ok(removed)
    }

    /// Count live entries. O(n) over every chain; concurrent mutations may
    /// or may not be reflected.
    pub fn len(&self) -> Result<usize, MapError> {
        let handle = self.domain.enter()?;
        let backoff = Backoff::new();
        let mut total = 0;
        for head in self.buckets.iter() {
            total += 'bucket: loop {
                let mut count = 0;
                let mut slot = SLOT_CUR;
                let cur_addr = head.load(Ordering::Acquire);
                if cur_addr == 0 {
                    break 'bucket 0;
                }
                let mut cur = cur_addr as *mut Node<K, V>;
                handle.protect(slot, cur);
                if head.load(Ordering::Acquire) != cur_addr {
                    backoff.spin();
                    continue 'bucket;
                }
                loop {
                    let next = unsafe { (*cur).next.load(Ordering::Acquire) };
                    if !tagged::is_marked(next) {
                        count += 1;
                    }
                    let next_addr = tagged::without_mark(next);
                    if next_addr == 0 {
                        break 'bucket count;
                    }
                    // Alternate slots: protect the successor while the
                    // current node still validates the link to it.
                    let other = 1 - slot;
                    let successor = next_addr as *mut Node<K, V>;
                    handle.protect(other, successor);
                    if unsafe { (*cur).next.load(Ordering::Acquire) } != next {
                        backoff.spin();
                        continue 'bucket;
                    }
                    cur = successor;
                    slot = other;
                }
            };
        }
        handle.clear(SLOT_CUR);
        handle.clear(SLOT_PRED);
        Ok(total)
    }

    /// Whether the map has no live entries.
    pub fn is_empty(&self) -> Result<bool, MapError> {
        Ok(self.len()? == 0)
    }
}

impl<K, V, S> Drop for LockFreeMap<K, V, S> {
    fn drop(&mut self) {
        self.clear();
        // The domain drops next and frees whatever was still retired.
    }
}

// SAFETY: all shared mutation goes through atomics and the hazard domain;
// keys and values cross threads through insert/remove/reclaim.
unsafe impl<K: Send, V: Send, S: Send> Send for LockFreeMap<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync> Sync for LockFreeMap<K, V, S> {}
