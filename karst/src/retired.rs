//! Retired entries awaiting reclamation.
//!
//! A retired pointer carries a type-erased destructor so the domain can free
//! it without knowing the pointee type. Entries live on the retiring
//! thread's list until a scan proves no hazard slot still holds the address,
//! or until domain teardown frees everything unconditionally.

/// Type-erased destructor invoked exactly once per retired pointer.
pub(crate) type DestructorFn = unsafe fn(*mut u8);

/// An unlinked pointer awaiting physical deletion.
pub(crate) struct Retired {
    /// Address of the retired allocation, as published in hazard slots.
    pub(crate) ptr: *mut u8,
    /// Frees the allocation. Set at retire time from the concrete type.
    pub(crate) destructor: DestructorFn,
    /// Dense index of the thread that performed the retire. Carried for
    /// diagnostics; reclamation never branches on it.
    #[allow(dead_code)]
    pub(crate) owner: usize,
}

impl Retired {
    /// Erase `ptr` into a retired entry.
    ///
    /// # Safety
    ///
    /// - `ptr` must come from `Box::into_raw` and must not be reachable from
    ///   any shared location anymore.
    /// - `ptr` must not be retired more than once.
    pub(crate) unsafe fn new<T: Send + 'static>(ptr: *mut T, owner: usize) -> Self {
        unsafe fn drop_box<T>(ptr: *mut u8) {
            // SAFETY: `ptr` was erased from a `Box<T>` in `Retired::new` and
            // this destructor runs exactly once.
            unsafe { drop(Box::from_raw(ptr as *mut T)) }
        }
        Self {
            ptr: ptr as *mut u8,
            destructor: drop_box::<T>,
            owner,
        }
    }

    /// Free the retired allocation.
    ///
    /// # Safety
    ///
    /// No hazard slot may hold `self.ptr`, and this must be called at most
    /// once per entry.
    #[inline]
    pub(crate) unsafe fn free(self) {
        unsafe { (self.destructor)(self.ptr) }
    }
}

// SAFETY: the pointee is `Send + 'static` (enforced by `Retired::new`), so
// entries may migrate to the drain list and be freed by another thread.
unsafe impl Send for Retired {}
