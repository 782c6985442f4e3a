//! Typed errors for map operations.

use core::fmt;

/// Errors surfaced by [`LockFreeMap`](crate::LockFreeMap).
///
/// Absence of a key is never an error: `get` returns `Ok(None)` and
/// `remove` returns `Ok(false)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    /// The map was constructed with a bucket count of zero.
    ZeroBuckets,
    /// More distinct threads touched the map than its hazard domain can
    /// register; the operation had no effect.
    ThreadLimit {
        /// Registry size of the map's domain.
        max_threads: usize,
    },
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::ZeroBuckets => write!(f, "bucket count must be positive"),
            MapError::ThreadLimit { max_threads } => {
                write!(f, "thread registry exhausted ({max_threads} threads)")
            }
        }
    }
}

impl std::error::Error for MapError {}

impl From<karst::Error> for MapError {
    fn from(err: karst::Error) -> Self {
        match err {
            karst::Error::ThreadLimit { max_threads } => MapError::ThreadLimit { max_threads },
        }
    }
}
