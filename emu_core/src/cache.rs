//! Object cache: a page-backed slab for queue records.
//!
//! Event and command records are small, fixed-size and short-lived; the
//! cache recycles their cells instead of round-tripping the global
//! allocator on every submission. One cache exists per record type
//! (the Rust rendering of a per-size cache); handles are reference
//! counted, and backing pages are only released when the last handle and
//! the last live cell are gone.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

/// Backing pages are allocated in this granularity [bytes].
const PAGE_BYTES: usize = 4096;

struct Slot<T>(UnsafeCell<MaybeUninit<T>>);

struct CacheState<T> {
    /// Backing pages; boxed slices never move once allocated.
    pages: Vec<Box<[Slot<T>]>>,
    /// Cells available for allocation.
    free: Vec<NonNull<Slot<T>>>,
}

// SAFETY: the raw slot pointers reference cells inside `pages`, which the
// same struct owns; the freelist discipline hands each cell to at most one
// holder at a time.
unsafe impl<T: Send> Send for CacheState<T> {}

struct Shared<T> {
    state: Mutex<CacheState<T>>,
    cells_per_page: usize,
}

/// Reference-counted slab cache for values of type `T`.
pub struct ObjectCache<T> {
    shared: Arc<Shared<T>>,
}

impl<T> ObjectCache<T> {
    /// Create an empty cache. The first allocation grows one page.
    pub fn new() -> Self {
        let cells_per_page = (PAGE_BYTES / size_of::<T>().max(1)).max(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    pages: Vec::new(),
                    free: Vec::new(),
                }),
                cells_per_page,
            }),
        }
    }

    /// Another handle to the same cache (refcount increment).
    pub fn handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Move `value` into a recycled cell.
    pub fn alloc(&self, value: T) -> CacheBox<T> {
        let slot = {
            let mut state = self.shared.state.lock();
            match state.free.pop() {
                Some(slot) => slot,
                None => {
                    grow(&mut state, self.shared.cells_per_page);
                    state.free.pop().expect("fresh page has free cells")
                }
            }
        };
        // SAFETY: the cell came off the freelist, so no other holder can
        // reference it; writing initializes the MaybeUninit.
        unsafe {
            (*(*slot.as_ptr()).0.get()).write(value);
        }
        CacheBox {
            slot,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cells currently on the freelist.
    pub fn free_cells(&self) -> usize {
        self.shared.state.lock().free.len()
    }

    /// Backing pages allocated so far.
    pub fn pages(&self) -> usize {
        self.shared.state.lock().pages.len()
    }
}

impl<T> Default for ObjectCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ObjectCache<T> {
    fn clone(&self) -> Self {
        self.handle()
    }
}

fn grow<T>(state: &mut CacheState<T>, cells: usize) {
    let page: Box<[Slot<T>]> = (0..cells)
        .map(|_| Slot(UnsafeCell::new(MaybeUninit::uninit())))
        .collect();
    state.pages.push(page);
    let page = state.pages.last().expect("page just pushed");
    for slot in page.iter() {
        state.free.push(NonNull::from(slot));
    }
}

/// Owning handle to one cache cell. Dropping it drops the value and
/// returns the cell to the freelist.
pub struct CacheBox<T> {
    slot: NonNull<Slot<T>>,
    shared: Arc<Shared<T>>,
}

// SAFETY: a CacheBox is the sole holder of its cell; moving it between
// threads moves the contained T.
unsafe impl<T: Send> Send for CacheBox<T> {}
unsafe impl<T: Sync> Sync for CacheBox<T> {}

impl<T> CacheBox<T> {
    #[inline]
    fn value_ptr(&self) -> *mut T {
        // SAFETY: slot points into a live page (the Arc keeps it alive)
        // and was initialized by `alloc`.
        unsafe { (*self.slot.as_ptr()).0.get().cast::<T>() }
    }

    /// Move the value out, recycling the cell.
    pub fn take(self) -> T {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: value_ptr is initialized; ManuallyDrop suppresses the
        // Drop impl, so the value is read out exactly once, and the Arc
        // is moved out below rather than dropped.
        let value = unsafe { this.value_ptr().read() };
        let shared = unsafe { std::ptr::read(&this.shared) };
        shared.state.lock().free.push(this.slot);
        value
    }
}

impl<T> Deref for CacheBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see value_ptr.
        unsafe { &*self.value_ptr() }
    }
}

impl<T> DerefMut for CacheBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see value_ptr; &mut self guarantees exclusivity.
        unsafe { &mut *self.value_ptr() }
    }
}

impl<T> Drop for CacheBox<T> {
    fn drop(&mut self) {
        // SAFETY: the cell is initialized and exclusively ours.
        unsafe { std::ptr::drop_in_place(self.value_ptr()) };
        self.shared.state.lock().free.push(self.slot);
    }
}
