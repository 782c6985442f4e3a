//! Scan scheduling, drain-list sweeping, and teardown.

use karst::Domain;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

struct Tracked {
    payload: u64,
    drops: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn tracked(payload: u64, drops: &Arc<AtomicUsize>) -> *mut Tracked {
    Box::into_raw(Box::new(Tracked {
        payload,
        drops: Arc::clone(drops),
    }))
}

#[test]
fn crossing_the_threshold_triggers_a_scan() {
    let drops = Arc::new(AtomicUsize::new(0));
    let domain = Domain::with_max_threads(4);
    let threshold = domain.scan_threshold();
    let handle = domain.enter().unwrap();

    for _ in 0..threshold - 1 {
        unsafe { handle.retire(tracked(0, &drops)) };
    }
    assert_eq!(drops.load(Ordering::SeqCst), 0, "below threshold, nothing freed");

    // The threshold-crossing retire scans and frees the whole list.
    unsafe { handle.retire(tracked(0, &drops)) };
    assert_eq!(drops.load(Ordering::SeqCst), threshold);
    assert_eq!(handle.pending(), 0);
}

#[test]
fn teardown_frees_all_remaining_entries() {
    let drops = Arc::new(AtomicUsize::new(0));
    let domain = Domain::new();
    let handle = domain.enter().unwrap();

    for _ in 0..10 {
        unsafe { handle.retire(tracked(0, &drops)) };
    }
    // Still protected entries are freed too: teardown is unconditional.
    drop(handle);
    drop(domain);
    assert_eq!(drops.load(Ordering::SeqCst), 10);
}

#[test]
fn exited_threads_retired_list_is_swept() {
    let drops = Arc::new(AtomicUsize::new(0));
    let domain = Arc::new(Domain::new());

    {
        let domain = Arc::clone(&domain);
        let drops = Arc::clone(&drops);
        std::thread::spawn(move || {
            let handle = domain.enter().unwrap();
            for _ in 0..3 {
                unsafe { handle.retire(tracked(0, &drops)) };
            }
        })
        .join()
        .unwrap();
    }
    assert_eq!(drops.load(Ordering::SeqCst), 0, "exit drains, it does not free");

    // The next scan on any surviving thread sweeps the drained entries.
    let handle = domain.enter().unwrap();
    handle.reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

#[test]
fn domains_reclaim_independently() {
    let drops = Arc::new(AtomicUsize::new(0));
    let first = Domain::new();
    let second = Domain::new();

    let a = first.enter().unwrap();
    let b = second.enter().unwrap();

    unsafe { a.retire(tracked(0, &drops)) };
    b.reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(a.pending(), 1);

    a.reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// One writer keeps swapping a shared pointer and retiring the old value;
/// readers keep publishing and dereferencing it. Payload integrity after a
/// protected re-read proves no dereference raced a free.
#[test]
#[cfg_attr(miri, ignore)]
fn swap_hammer_never_frees_a_published_pointer() {
    const READERS: usize = 4;
    const SWAPS: usize = 20_000;

    let drops = Arc::new(AtomicUsize::new(0));
    let domain = Arc::new(Domain::new());
    let shared = Arc::new(AtomicPtr::new(tracked(u64::MAX, &drops)));
    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for _ in 0..READERS {
        let domain = Arc::clone(&domain);
        let shared = Arc::clone(&shared);
        let stop = Arc::clone(&stop);
        handles.push(std::thread::spawn(move || {
            let handle = domain.enter().unwrap();
            while !stop.load(Ordering::Relaxed) {
                let mut ptr = shared.load(Ordering::Acquire);
                loop {
                    handle.protect(0, ptr);
                    let reread = shared.load(Ordering::Acquire);
                    if reread == ptr {
                        break;
                    }
                    ptr = reread;
                }
                let payload = unsafe { (*ptr).payload };
                assert!(payload == u64::MAX || payload < SWAPS as u64);
                handle.clear(0);
            }
        }));
    }

    {
        let domain = Arc::clone(&domain);
        let shared = Arc::clone(&shared);
        let drops = Arc::clone(&drops);
        let writer = std::thread::spawn(move || {
            let handle = domain.enter().unwrap();
            for i in 0..SWAPS {
                let fresh = tracked(i as u64, &drops);
                let old = shared.swap(fresh, Ordering::AcqRel);
                unsafe { handle.retire(old) };
            }
        });
        writer.join().unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    for h in handles {
        h.join().unwrap();
    }

    // Last value is still live in `shared`; free it through the domain.
    let handle = domain.enter().unwrap();
    let last = shared.swap(std::ptr::null_mut(), Ordering::AcqRel);
    unsafe { handle.retire(last) };
    drop(handle);
    drop(shared);
    drop(domain);
    assert_eq!(drops.load(Ordering::SeqCst), SWAPS + 1);
}
