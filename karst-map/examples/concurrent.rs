//! Walkthrough: basic dictionary use, then a mixed multi-threaded run.

use karst_map::LockFreeMap;
use std::sync::Arc;
use std::thread;

fn main() {
    // Single-threaded basics.
    let map = LockFreeMap::with_buckets(16).unwrap();
    map.insert("apple", 1).unwrap();
    map.insert("banana", 2).unwrap();
    map.insert("cherry", 3).unwrap();

    for fruit in ["apple", "banana", "cherry", "orange"] {
        match map.get(fruit).unwrap() {
            Some(v) => println!("{fruit}: {v}"),
            None => println!("{fruit}: not found"),
        }
    }

    assert!(map.remove("banana").unwrap());
    println!("removed banana; banana now {:?}", map.get("banana").unwrap());
    println!("apple still {:?}", map.get("apple").unwrap());

    // Mixed workload across 8 threads.
    let shared = Arc::new(LockFreeMap::with_buckets(128).unwrap());
    let mut handles = Vec::new();
    for id in 0..8_u64 {
        let shared = Arc::clone(&shared);
        handles.push(thread::spawn(move || {
            for i in 0..1_000 {
                let key = id * 1_000 + i;
                shared.insert(key, key * 10).unwrap();
                assert_eq!(shared.get(&key).unwrap(), Some(key * 10));
                if i % 2 == 0 {
                    shared.remove(&key).unwrap();
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    println!("after mixed workload: {} live entries", shared.len().unwrap());
}
