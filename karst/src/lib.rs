//! Karst: hazard-pointer memory reclamation for lock-free data structures.
//!
//! A removed node in a lock-free structure cannot be freed immediately:
//! another thread may have loaded its address a moment before the unlink.
//! Karst solves this with per-thread hazard slots: a reader publishes the
//! pointer it is about to dereference, a remover retires unlinked nodes to a
//! thread-local list, and a periodic scan frees exactly the retired nodes no
//! published slot still names.
//!
//! # Key Properties
//!
//! - **Instance-scoped**: a [`Domain`] belongs to the structure that owns
//!   it; independent structures reclaim independently.
//! - **Lock-free reads and writes**: publishing, clearing, and retiring are
//!   single atomic stores or thread-local appends.
//! - **Bounded memory**: a thread's retired list is scanned once it crosses
//!   a threshold sized to the worst-case number of published hazards.
//!
//! # Example
//!
//! ```
//! use karst::Domain;
//! use std::sync::atomic::{AtomicPtr, Ordering};
//!
//! let domain = Domain::new();
//! let shared = AtomicPtr::new(Box::into_raw(Box::new(42)));
//!
//! let handle = domain.enter().unwrap();
//!
//! // Publish before dereferencing, then confirm the source still agrees.
//! let mut ptr = shared.load(Ordering::Acquire);
//! loop {
//!     handle.protect(0, ptr);
//!     let reread = shared.load(Ordering::Acquire);
//!     if reread == ptr {
//!         break;
//!     }
//!     ptr = reread;
//! }
//! assert_eq!(unsafe { *ptr }, 42);
//! handle.clear(0);
//!
//! // The unlinking side retires instead of freeing.
//! let old = shared.swap(std::ptr::null_mut(), Ordering::AcqRel);
//! unsafe { handle.retire(old) };
//! ```

#![warn(missing_docs)]

mod domain;
mod retired;
mod slot;
mod spin;

pub use domain::{Domain, LocalHandle};
pub use slot::{DEFAULT_MAX_THREADS, SLOTS_PER_THREAD};

use core::fmt;

/// Errors surfaced by a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// More distinct threads touched the domain than its table can register.
    ThreadLimit {
        /// The table size the domain was constructed with.
        max_threads: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ThreadLimit { max_threads } => {
                write!(f, "thread registry exhausted ({max_threads} threads)")
            }
        }
    }
}

impl std::error::Error for Error {}
