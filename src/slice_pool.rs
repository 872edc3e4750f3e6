//! Concurrent pools that lend circular-buffer slices to application
//! threads.
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ APPLICATION THREAD (hot path)                                │
//! │   pool.borrow(capacity) → OwnedSlice ─┐                      │
//! │   slice.push(event) ...               │ handle drop returns  │
//! └───────────────────────────────────────┼──────────────────────┘
//!                                         ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ SlicePool                                                    │
//! │   ReservedSlicePool: one up-front allocation, carved into    │
//! │     uniform regions, free list on a lock-free ArrayQueue     │
//! │   DynamicSlicePool:  lazy allocations against an atomic      │
//! │     capacity budget, CAS loop bounded by a retry limit       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Borrowing never blocks. The reserved pool is the fast path: popping a
//! pre-carved region off a lock-free queue. The dynamic pool supplies
//! overflow capacity when the reserved pool is saturated, at the cost of
//! an allocation, and bounds its CAS retries so a borrow under heavy
//! contention fails fast instead of spinning.
//!
//! # Capacity accounting
//!
//! Each pool maintains `outstanding + free <= configured capacity` at
//! every observable point, including under concurrent borrow and return.
//!
//! # Ownership
//!
//! [`OwnedSlice`] is an exclusive borrow handle: the pool retains
//! ownership of the memory and the handle returns the slice on drop. The
//! handle holds the pool's shared state alive, so a reserved region's
//! pointer can never outlive its backing allocation.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use crate::circular_buffer::{CircularBuffer, OwnedBufferSlice, UnownedBufferSlice};

/// Why a `borrow` call came back empty-handed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BorrowError {
    /// The pool has no free capacity.
    NoSlicesAvailable,
    /// Contention defeated the dynamic pool's bounded CAS loop.
    CasAttemptsExhausted,
}

/// Configuration for [`ReservedSlicePool`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReservedSlicePoolOptions {
    /// Total pool capacity in elements, allocated at construction.
    pub capacity: usize,
    /// Uniform per-slice capacity the pool is carved into.
    pub slice_capacity: usize,
}

/// Configuration for [`DynamicSlicePool`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DynamicSlicePoolOptions {
    /// Total pool capacity ceiling in elements.
    pub capacity: usize,
    /// Per-slice capacity ceiling.
    pub slice_capacity: usize,
    /// Bound on CAS iterations per borrow.
    pub borrow_cas_attempts: usize,
}

/// Configuration for the combined [`SlicePool`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlicePoolOptions {
    pub reserved_pool_options: ReservedSlicePoolOptions,
    pub dynamic_pool_options: DynamicSlicePoolOptions,
}

struct ReservedShared<T> {
    // Single backing allocation, carved into regions of `slice_capacity`
    // elements (the last region may be shorter). Regions are mutated only
    // through the `UnownedBufferSlice` of the thread that popped them.
    storage: Box<[UnsafeCell<T>]>,
    free_regions: ArrayQueue<usize>,
    free_capacity: AtomicUsize,
    slice_capacity: usize,
    capacity: usize,
}

// SAFETY: a region is reachable either from the free queue or from exactly
// one `OwnedSlice` handle, never both, so cross-thread access to the
// UnsafeCell contents is exclusive by construction.
unsafe impl<T: Send> Send for ReservedShared<T> {}
unsafe impl<T: Send> Sync for ReservedShared<T> {}

impl<T> ReservedShared<T> {
    fn region_capacity(&self, region: usize) -> usize {
        usize::min(self.slice_capacity, self.capacity - region * self.slice_capacity)
    }

    fn region_ptr(&self, region: usize) -> NonNull<T> {
        let ptr = self.storage[region * self.slice_capacity].get();
        // SAFETY: pointers into a live Box are never null.
        unsafe { NonNull::new_unchecked(ptr) }
    }
}

/// Pool backed by a single allocation made at construction. Hot paths
/// prefer it: a borrow is one lock-free queue pop.
pub struct ReservedSlicePool<T> {
    shared: Arc<ReservedShared<T>>,
}

impl<T: Copy + Default> ReservedSlicePool<T> {
    pub fn new(options: ReservedSlicePoolOptions) -> Self {
        let ReservedSlicePoolOptions {
            capacity,
            slice_capacity,
        } = options;
        let storage: Box<[UnsafeCell<T>]> =
            (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();
        let region_count = if slice_capacity == 0 {
            0
        } else {
            (capacity + slice_capacity - 1) / slice_capacity
        };
        // ArrayQueue rejects zero capacity; an empty pool keeps a one-slot
        // queue that never holds a region.
        let free_regions = ArrayQueue::new(usize::max(region_count, 1));
        for region in 0..region_count {
            let _ = free_regions.push(region);
        }
        let usable_capacity = if region_count == 0 { 0 } else { capacity };
        Self {
            shared: Arc::new(ReservedShared {
                storage,
                free_regions,
                free_capacity: AtomicUsize::new(usable_capacity),
                slice_capacity,
                capacity,
            }),
        }
    }

    /// Lends the next free slice with capacity
    /// `min(slice_capacity, preferred_slice_capacity)`.
    pub fn borrow(
        &self,
        preferred_slice_capacity: usize,
    ) -> Result<OwnedSlice<T>, BorrowError> {
        let region = match self.shared.free_regions.pop() {
            Some(region) => region,
            None => return Err(BorrowError::NoSlicesAvailable),
        };
        let region_capacity = self.shared.region_capacity(region);
        self.shared
            .free_capacity
            .fetch_sub(region_capacity, Ordering::AcqRel);
        let capacity = usize::min(region_capacity, preferred_slice_capacity);
        // SAFETY: `region` was just popped from the free queue, so this is
        // the only live pointer into it; the storage was initialized at
        // construction and is kept alive by the Arc the handle holds.
        let slice = unsafe { UnownedBufferSlice::new(self.shared.region_ptr(region), capacity) };
        Ok(OwnedSlice {
            buffer: CircularBuffer::Unowned(slice),
            provenance: Provenance::Reserved {
                shared: Arc::clone(&self.shared),
                region,
            },
        })
    }

    /// Capacity currently available to borrow, in elements.
    pub fn size(&self) -> usize {
        self.shared.free_capacity.load(Ordering::Acquire)
    }

    /// Configured total capacity in elements.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity() <= self.size()
    }
}

struct DynamicShared {
    available: AtomicUsize,
    capacity: usize,
    slice_capacity: usize,
    borrow_cas_attempts: usize,
}

/// Pool that allocates slices on demand against an atomic capacity
/// budget. Supplies overflow buffers when the reserved pool is saturated.
pub struct DynamicSlicePool<T> {
    shared: Arc<DynamicShared>,
    _element: PhantomData<fn() -> T>,
}

impl<T: Copy + Default> DynamicSlicePool<T> {
    pub fn new(options: DynamicSlicePoolOptions) -> Self {
        let DynamicSlicePoolOptions {
            capacity,
            slice_capacity,
            borrow_cas_attempts,
        } = options;
        Self {
            shared: Arc::new(DynamicShared {
                available: AtomicUsize::new(capacity),
                capacity,
                slice_capacity,
                borrow_cas_attempts,
            }),
            _element: PhantomData,
        }
    }

    /// Reserves capacity `min(slice_capacity, preferred, available)` with
    /// a CAS loop bounded by `borrow_cas_attempts`, then allocates the
    /// slice. Returning the handle releases both the memory and the
    /// capacity.
    pub fn borrow(
        &self,
        preferred_slice_capacity: usize,
    ) -> Result<OwnedSlice<T>, BorrowError> {
        let shared = &self.shared;
        for _ in 0..shared.borrow_cas_attempts {
            let available = shared.available.load(Ordering::Acquire);
            if available == 0 {
                return Err(BorrowError::NoSlicesAvailable);
            }
            let capacity = available
                .min(shared.slice_capacity)
                .min(preferred_slice_capacity);
            let exchanged = shared.available.compare_exchange(
                available,
                available - capacity,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            if exchanged.is_ok() {
                return Ok(OwnedSlice {
                    buffer: CircularBuffer::Owned(OwnedBufferSlice::new(capacity)),
                    provenance: Provenance::Dynamic {
                        shared: Arc::clone(shared),
                        capacity,
                    },
                });
            }
        }
        Err(BorrowError::CasAttemptsExhausted)
    }

    /// Capacity currently available to borrow, in elements.
    pub fn size(&self) -> usize {
        self.shared.available.load(Ordering::Acquire)
    }

    /// Configured capacity ceiling in elements.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity() <= self.size()
    }
}

/// Reserved pool with dynamic overflow: tries the reserved pool first and
/// falls back to the dynamic pool, surfacing the dynamic pool's error when
/// both are exhausted.
pub struct SlicePool<T> {
    reserved: ReservedSlicePool<T>,
    dynamic: DynamicSlicePool<T>,
}

impl<T: Copy + Default> SlicePool<T> {
    pub fn new(options: SlicePoolOptions) -> Self {
        Self {
            reserved: ReservedSlicePool::new(options.reserved_pool_options),
            dynamic: DynamicSlicePool::new(options.dynamic_pool_options),
        }
    }

    pub fn borrow(
        &self,
        preferred_slice_capacity: usize,
    ) -> Result<OwnedSlice<T>, BorrowError> {
        match self.reserved.borrow(preferred_slice_capacity) {
            Ok(slice) => Ok(slice),
            Err(_) => self.dynamic.borrow(preferred_slice_capacity),
        }
    }

    /// Capacity currently available across both pools, in elements.
    pub fn size(&self) -> usize {
        self.reserved.size() + self.dynamic.size()
    }

    /// Combined configured capacity in elements.
    pub fn capacity(&self) -> usize {
        self.reserved.capacity() + self.dynamic.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity() <= self.size()
    }
}

enum Provenance<T> {
    Reserved {
        shared: Arc<ReservedShared<T>>,
        region: usize,
    },
    Dynamic {
        shared: Arc<DynamicShared>,
        capacity: usize,
    },
}

/// Exclusive handle to a borrowed slice. The pool retains ownership;
/// dropping the handle returns the slice.
pub struct OwnedSlice<T> {
    buffer: CircularBuffer<T>,
    provenance: Provenance<T>,
}

impl<T: Copy> std::fmt::Debug for OwnedSlice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedSlice")
            .field("size", &self.buffer.size())
            .field("capacity", &self.buffer.capacity())
            .finish()
    }
}

impl<T> Deref for OwnedSlice<T> {
    type Target = CircularBuffer<T>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl<T> DerefMut for OwnedSlice<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl<T> Drop for OwnedSlice<T> {
    fn drop(&mut self) {
        match &self.provenance {
            Provenance::Reserved { shared, region } => {
                shared
                    .free_capacity
                    .fetch_add(shared.region_capacity(*region), Ordering::AcqRel);
                // Sized to hold every region, so the push cannot fail.
                let _ = shared.free_regions.push(*region);
            }
            Provenance::Dynamic { shared, capacity } => {
                shared.available.fetch_add(*capacity, Ordering::AcqRel);
            }
        }
    }
}
