//! Karst-map: a lock-free separate-chaining hash map with hazard-pointer
//! reclamation.
//!
//! Insert, point lookup, and removal run concurrently from many threads
//! without a lock anywhere on the data path: bucket heads and chain links
//! change only through compare-and-swap, and removed nodes are retired to a
//! per-map [`karst`] domain so a reader that already loaded an address can
//! finish dereferencing it before the storage is freed.
//!
//! The bucket count is fixed at construction; each operation is
//! linearizable and lock-free in the progress-guarantee sense: whatever
//! the scheduling, some contending operation completes in a bounded number
//! of its own steps.
//!
//! # Example
//!
//! ```
//! use karst_map::{Insert, LockFreeMap};
//!
//! let map = LockFreeMap::with_buckets(64).unwrap();
//! assert_eq!(map.insert("apple", 1).unwrap(), Insert::Added);
//! assert_eq!(map.insert("apple", 2).unwrap(), Insert::Updated);
//! assert_eq!(map.get("apple").unwrap(), Some(2));
//! assert!(map.remove("apple").unwrap());
//! assert_eq!(map.get("apple").unwrap(), None);
//! ```

#![warn(missing_docs)]

mod error;
mod map;
mod tagged;

pub use error::MapError;
pub use map::{Insert, LockFreeMap, DEFAULT_BUCKET_COUNT};
