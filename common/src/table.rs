//! Aligned Buffer Storage
//!
//! Fixed-size, cache-line aligned storage for the data-plane buffers shared
//! between pipeline stages and for the private scratch buffers of each
//! worker. Nothing here ever reallocates after construction.

use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use thiserror::Error;
use tracing::trace;

use crate::types::CACHE_LINE_BYTES;

/// Allocation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("Buffer size overflows: {count} elements")]
    Overflow { count: usize },

    #[error("Failed to allocate {bytes} bytes aligned to {align}")]
    OutOfMemory { bytes: usize, align: usize },
}

/// Heap array aligned to a cache line, initialized with `T::default()`
pub struct AlignedBuffer<T> {
    ptr: NonNull<T>,
    len: usize,
    layout: Layout,
}

impl<T: Copy + Default> AlignedBuffer<T> {
    /// Allocate `len` elements aligned to [`CACHE_LINE_BYTES`]
    pub fn new(len: usize) -> Result<Self, AllocError> {
        let align = CACHE_LINE_BYTES.max(std::mem::align_of::<T>());
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(AllocError::Overflow { count: len })?;
        // Zero-sized requests still get one cache line so the pointer is real
        let layout = Layout::from_size_align(bytes.max(align), align)
            .map_err(|_| AllocError::Overflow { count: len })?;

        let raw = unsafe { alloc::alloc(layout) } as *mut T;
        let ptr = NonNull::new(raw).ok_or(AllocError::OutOfMemory {
            bytes: layout.size(),
            align,
        })?;

        for i in 0..len {
            unsafe { ptr.as_ptr().add(i).write(T::default()) };
        }
        trace!("Allocated {} bytes aligned to {}", layout.size(), align);

        Ok(Self { ptr, len, layout })
    }
}

impl<T> AlignedBuffer<T> {
    /// Number of elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw pointer to the first element
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }
}

impl<T> Deref for AlignedBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> DerefMut for AlignedBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> Drop for AlignedBuffer<T> {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, self.layout) };
    }
}

impl<T> std::fmt::Debug for AlignedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("align", &self.layout.align())
            .finish()
    }
}

// Safety: AlignedBuffer owns its allocation exclusively
unsafe impl<T: Send> Send for AlignedBuffer<T> {}
unsafe impl<T: Sync> Sync for AlignedBuffer<T> {}

/// Two-dimensional buffer with one cache-line aligned row per entry
///
/// Rows are padded to a whole number of cache lines so that every row
/// starts on its own line. Rows are read through shared references;
/// writes from concurrently running workers go through
/// [`Table::shared_slice_mut`], whose disjointness contract is upheld by
/// the task scheduler.
pub struct Table<T> {
    data: AlignedBuffer<T>,
    rows: usize,
    row_len: usize,
    stride: usize,
}

impl<T: Copy + Default> Table<T> {
    /// Allocate a `rows` x `row_len` table filled with `T::default()`
    pub fn new(rows: usize, row_len: usize) -> Result<Self, AllocError> {
        let elem = std::mem::size_of::<T>().max(1);
        let per_line = (CACHE_LINE_BYTES / elem).max(1);
        let stride = row_len.div_ceil(per_line) * per_line;
        let total = rows
            .checked_mul(stride)
            .ok_or(AllocError::Overflow { count: rows })?;

        Ok(Self {
            data: AlignedBuffer::new(total)?,
            rows,
            row_len,
            stride,
        })
    }

    /// Overwrite every element, padding included
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T> Table<T> {
    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of valid elements per row
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    /// Read access to one row
    pub fn row(&self, row: usize) -> &[T] {
        debug_assert!(row < self.rows, "row {} out of {}", row, self.rows);
        // Built from the raw pointer so that no reference spans other rows
        unsafe {
            std::slice::from_raw_parts(self.data.as_ptr().add(row * self.stride), self.row_len)
        }
    }

    /// Exclusive access to one row
    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        debug_assert!(row < self.rows, "row {} out of {}", row, self.rows);
        unsafe {
            std::slice::from_raw_parts_mut(
                (self.data.as_ptr() as *mut T).add(row * self.stride),
                self.row_len,
            )
        }
    }

    /// Mutable view of `len` elements of `row` starting at `start`,
    /// obtained through a shared reference.
    ///
    /// Bounds are checked in debug builds only.
    ///
    /// # Safety
    /// For the lifetime of the returned slice no other reference, shared or
    /// mutable, may observe any of the addressed elements. Concurrent
    /// workers must therefore address disjoint regions.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn shared_slice_mut(&self, row: usize, start: usize, len: usize) -> &mut [T] {
        debug_assert!(row < self.rows, "row {} out of {}", row, self.rows);
        debug_assert!(
            start + len <= self.row_len,
            "range {}..{} exceeds row length {}",
            start,
            start + len,
            self.row_len
        );
        let base = (self.data.as_ptr() as *mut T).add(row * self.stride + start);
        std::slice::from_raw_parts_mut(base, len)
    }
}

impl<T> std::fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("rows", &self.rows)
            .field("row_len", &self.row_len)
            .field("stride", &self.stride)
            .finish()
    }
}
