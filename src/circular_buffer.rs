//! Fixed-capacity circular buffers with overwrite-on-full semantics and
//! zero-copy chunk export.
//!
//! # Design
//!
//! The hot path pushes trivially copyable events into a thread-local ring;
//! the flush worker later reads the ring's contents directly from its
//! backing storage. To make that read cheap the buffer does not expose an
//! iterator: it exposes at most two contiguous memory chunks, ordered
//! oldest-first, that the trace writer can serialize without staging the
//! events through an intermediate copy.
//!
//! Two realizations share the same operation set:
//!
//! - [`OwnedBufferSlice`] allocates its storage once at construction and
//!   frees it on drop. Dynamic pools hand these out.
//! - [`UnownedBufferSlice`] operates over a span of memory owned by someone
//!   else (in practice a reserved pool's backing allocation) and never
//!   allocates or frees.
//!
//! [`CircularBuffer`] is the tagged variant over both, so downstream code
//! (flush queue, trace writer) handles either uniformly.
//!
//! # Element type
//!
//! Elements are plain data (`T: Copy`). Overwriting on wrap and `clear`
//! deliberately do not drop the displaced values.

use std::ptr::NonNull;

/// Shared operation set of the two buffer realizations.
///
/// A buffer with capacity zero is simultaneously empty and full and
/// silently discards pushes.
#[derive(Debug)]
pub enum CircularBuffer<T> {
    Owned(OwnedBufferSlice<T>),
    Unowned(UnownedBufferSlice<T>),
}

impl<T: Copy> CircularBuffer<T> {
    /// Appends `item`, overwriting the oldest element once full.
    pub fn push(&mut self, item: T) {
        match self {
            Self::Owned(slice) => slice.push(item),
            Self::Unowned(slice) => slice.push(item),
        }
    }

    /// Resets the buffer to empty without touching the stored bytes.
    pub fn clear(&mut self) {
        match self {
            Self::Owned(slice) => slice.clear(),
            Self::Unowned(slice) => slice.clear(),
        }
    }

    /// Count of valid elements, at most `capacity`.
    pub fn size(&self) -> usize {
        match self {
            Self::Owned(slice) => slice.size(),
            Self::Unowned(slice) => slice.size(),
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            Self::Owned(slice) => slice.capacity(),
            Self::Unowned(slice) => slice.capacity(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity() <= self.size()
    }

    /// True iff the next `push` would land the insertion index back at the
    /// start of the storage.
    pub fn will_wrap_on_next_push(&self) -> bool {
        match self {
            Self::Owned(slice) => slice.will_wrap_on_next_push(),
            Self::Unowned(slice) => slice.will_wrap_on_next_push(),
        }
    }

    /// Zero, one, or two views over the internal storage, oldest element
    /// first. Concatenated, the chunks are the buffered elements in push
    /// order. Views are valid until the next mutation.
    pub fn contiguous_memory_chunks(&self) -> Vec<&[T]> {
        match self {
            Self::Owned(slice) => slice.contiguous_memory_chunks(),
            Self::Unowned(slice) => slice.contiguous_memory_chunks(),
        }
    }
}

/// Circular buffer that owns its backing storage.
#[derive(Debug)]
pub struct OwnedBufferSlice<T> {
    storage: Box<[T]>,
    insertion_index: usize,
    size: usize,
}

impl<T: Copy + Default> OwnedBufferSlice<T> {
    /// Allocates storage for `capacity` elements up front. This is the only
    /// allocation the buffer ever performs.
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![T::default(); capacity].into_boxed_slice(),
            insertion_index: 0,
            size: 0,
        }
    }
}

impl<T: Copy> OwnedBufferSlice<T> {
    pub fn push(&mut self, item: T) {
        let capacity = self.storage.len();
        if capacity == 0 {
            return;
        }
        self.storage[self.insertion_index] = item;
        self.insertion_index += 1;
        if self.insertion_index == capacity {
            self.insertion_index = 0;
        }
        self.size = usize::min(self.size + 1, capacity);
    }

    pub fn clear(&mut self) {
        self.insertion_index = 0;
        self.size = 0;
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity() <= self.size
    }

    pub fn will_wrap_on_next_push(&self) -> bool {
        self.capacity() == 0 || self.insertion_index == self.capacity() - 1
    }

    pub fn contiguous_memory_chunks(&self) -> Vec<&[T]> {
        if self.is_empty() {
            return Vec::new();
        }
        if !self.is_full() || self.insertion_index == 0 {
            return vec![&self.storage[..self.size]];
        }
        vec![
            &self.storage[self.insertion_index..],
            &self.storage[..self.insertion_index],
        ]
    }
}

/// Circular buffer over externally owned storage.
///
/// The slice records only a pointer and a capacity; it never allocates,
/// frees, or drops elements. Reserved pools carve their single backing
/// allocation into these.
#[derive(Debug)]
pub struct UnownedBufferSlice<T> {
    storage: NonNull<T>,
    capacity: usize,
    insertion_index: usize,
    size: usize,
}

// SAFETY: the slice holds the only live pointer into its span (constructor
// contract), so sending it to another thread is sending exclusive access.
unsafe impl<T: Send> Send for UnownedBufferSlice<T> {}
unsafe impl<T: Send> Sync for UnownedBufferSlice<T> {}

impl<T: Copy> UnownedBufferSlice<T> {
    /// Creates a buffer over `capacity` elements starting at `storage`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `storage..storage + capacity` is a
    /// span of initialized `T` that stays allocated for the life of the
    /// slice, and that no other reference reads or writes the span while
    /// the slice exists.
    pub unsafe fn new(storage: NonNull<T>, capacity: usize) -> Self {
        Self {
            storage,
            capacity,
            insertion_index: 0,
            size: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        // SAFETY: insertion_index < capacity and the span is valid for
        // writes per the constructor contract.
        unsafe {
            *self.storage.as_ptr().add(self.insertion_index) = item;
        }
        self.insertion_index += 1;
        if self.insertion_index == self.capacity {
            self.insertion_index = 0;
        }
        self.size = usize::min(self.size + 1, self.capacity);
    }

    pub fn clear(&mut self) {
        self.insertion_index = 0;
        self.size = 0;
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity <= self.size
    }

    pub fn will_wrap_on_next_push(&self) -> bool {
        self.capacity == 0 || self.insertion_index == self.capacity - 1
    }

    pub fn contiguous_memory_chunks(&self) -> Vec<&[T]> {
        if self.is_empty() {
            return Vec::new();
        }
        let storage = self.storage.as_ptr();
        if !self.is_full() || self.insertion_index == 0 {
            // SAFETY: the first `size` elements were written by `push` and
            // the span is valid for reads per the constructor contract.
            return vec![unsafe { std::slice::from_raw_parts(storage, self.size) }];
        }
        // SAFETY: both ranges lie inside the span and every slot has been
        // written at least once (the buffer is full).
        unsafe {
            vec![
                std::slice::from_raw_parts(
                    storage.add(self.insertion_index),
                    self.capacity - self.insertion_index,
                ),
                std::slice::from_raw_parts(storage, self.insertion_index),
            ]
        }
    }
}
