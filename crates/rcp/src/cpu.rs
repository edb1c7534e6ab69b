//! Memory shared between the CPU and the rest of the RCP.
//!
//! Sharing memory with a DMA engine has three requirements:
//! - the data cache must be written back before a device reads the memory, and invalidated
//!   before the CPU reads what a device wrote;
//! - cache maintenance works on whole lines, so shared memory must not share a line with
//!   anything else;
//! - the memory must stay put and alive while a transfer is in flight.
//!
//! [`Buffer`] takes care of the first two, [`Pinner`] of the last.
mod pin;

#[cfg(test)]
mod test;

use std::alloc::Layout;
use std::marker::PhantomData;
use std::ptr::NonNull;

use vr4300::{CACHE_LINE, PhysAddr};
use zerocopy::{FromBytes, Immutable, IntoBytes};

pub use pin::Pinner;

use crate::hw;

/// Returns the sizes of the head and tail that have to be cut off a region so that the rest is
/// safe for cache operations. The region starts at `addr`, is `len` bytes long and owns `cap`
/// bytes.
///
/// The result is given as a pair of indices: `region[head..tail]` is the cache-safe part.
pub fn pads(addr: usize, len: usize, cap: usize) -> (usize, usize) {
    let head = (CACHE_LINE - addr % CACHE_LINE) % CACHE_LINE;
    let tail = (addr + cap) % CACHE_LINE;
    if head + tail >= cap {
        return (0, 0);
    }

    // the spare capacity past `len` already pads the tail
    let tail = tail.saturating_sub(cap - len);
    let head = head.min(len - tail);
    (head, len - tail)
}

/// Shrinks `bytes` to its cache-safe part. Returns that part along with the number of bytes
/// discarded at its head and tail.
pub fn pad(bytes: &mut [u8]) -> (&mut [u8], usize, usize) {
    let len = bytes.len();
    let (head, tail) = pads(bytes.as_ptr() as usize, len, len);
    (&mut bytes[head..tail], head, len - tail)
}

/// Whether `bytes` can safely be used for cache operations, i.e. it starts on a cache line and
/// covers whole lines.
pub fn is_aligned(bytes: &[u8]) -> bool {
    bytes.is_empty()
        || ((bytes.as_ptr() as usize).is_multiple_of(CACHE_LINE)
            && bytes.len().is_multiple_of(CACHE_LINE))
}

/// Writes the cached contents of `bytes` back to memory. Call this before handing memory the CPU
/// modified to another component.
pub fn writeback(bytes: &[u8]) {
    hw::get().writeback(bytes.as_ptr(), bytes.len());
}

/// Discards the cached contents of `bytes`. Call this before reading memory another component
/// wrote.
///
/// # Panics
/// Panics if `bytes` is not cache-safe: invalidating a shared line discards unrelated writes.
pub fn invalidate(bytes: &mut [u8]) {
    assert!(is_aligned(bytes), "unpadded cache invalidate");
    hw::get().invalidate(bytes.as_mut_ptr(), bytes.len());
}

/// Allocates a cache-safe byte buffer of `len` bytes aligned to at least `extra_align`.
pub fn make_aligned(len: usize, extra_align: usize) -> Buffer {
    Buffer::aligned(len, extra_align)
}

/// A heap buffer that is safe to share with DMA engines: it starts on a cache line, its capacity
/// covers whole lines and it never moves.
pub struct Buffer<T = u8> {
    ptr: NonNull<T>,
    len: usize,
    layout: Layout,
}

// SAFETY: a buffer uniquely owns its allocation
unsafe impl<T: Send> Send for Buffer<T> {}
unsafe impl<T: Sync> Sync for Buffer<T> {}

impl<T> Buffer<T>
where
    T: FromBytes + IntoBytes + Immutable,
{
    /// Allocates a zeroed buffer of `len` elements.
    pub fn new(len: usize) -> Self {
        Self::aligned(len, 1)
    }

    /// Allocates a zeroed buffer of `len` elements aligned to at least `extra_align` bytes.
    pub fn aligned(len: usize, extra_align: usize) -> Self {
        assert!(extra_align.is_power_of_two(), "invalid alignment");

        let align = CACHE_LINE.max(extra_align).max(align_of::<T>());
        let size = (len * size_of::<T>()).next_multiple_of(CACHE_LINE).max(CACHE_LINE);
        let Ok(layout) = Layout::from_size_align(size, align) else {
            panic!("buffer of {len} elements is too large");
        };

        let ptr = hw::get().alloc(layout);
        let Some(ptr) = NonNull::new(ptr.cast::<T>()) else {
            std::alloc::handle_alloc_error(layout);
        };

        Self { ptr, len, layout }
    }

    /// Allocates a buffer holding a copy of `data`.
    pub fn from_slice(data: &[T]) -> Self
    where
        T: Copy,
    {
        let mut buf = Self::new(data.len());
        buf.copy_from_slice(data);
        buf
    }

    /// Size of the allocation in bytes, always a multiple of the cache line size.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Whether the buffer is safe for cache operations. Always true unless memory was corrupted.
    pub fn is_aligned(&self) -> bool {
        (self.ptr.as_ptr() as usize).is_multiple_of(CACHE_LINE)
            && self.capacity().is_multiple_of(CACHE_LINE)
    }

    /// Physical address of the first element.
    pub fn physical(&self) -> PhysAddr {
        match hw::get().physical(self.ptr.as_ptr().cast()) {
            Some(addr) => addr,
            None => panic!("buffer is not reachable by the rcp"),
        }
    }

    /// Writes the whole buffer back to memory.
    pub fn writeback(&self) {
        hw::get().writeback(self.ptr.as_ptr().cast(), self.capacity());
    }

    /// Discards the cached contents of the whole buffer.
    pub fn invalidate(&mut self) {
        hw::get().invalidate(self.ptr.as_ptr().cast(), self.capacity());
    }

    /// Returns a view of the buffer whose accesses bypass the data cache.
    pub fn uncached(&mut self) -> UncachedSlice<'_, T> {
        let ptr = hw::get().uncached(self.ptr.as_ptr().cast()).cast::<T>();
        UncachedSlice {
            ptr,
            len: self.len,
            _marker: PhantomData,
        }
    }

    /// The contents as raw bytes.
    pub fn bytes(&self) -> &[u8] {
        self.as_bytes()
    }

    /// The contents as mutable raw bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.as_mut_bytes()
    }
}

impl<T> std::ops::Deref for Buffer<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> std::ops::DerefMut for Buffer<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        unsafe { hw::get().dealloc(self.ptr.as_ptr().cast(), self.layout) };
    }
}

impl<T> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("capacity", &self.layout.size())
            .finish()
    }
}

/// A view of a [`Buffer`] through the uncached window. Every access is a volatile access that
/// goes straight to memory.
pub struct UncachedSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

impl<T: Copy> UncachedSlice<'_, T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn read(&self, index: usize) -> T {
        assert!(index < self.len);
        unsafe { self.ptr.add(index).read_volatile() }
    }

    #[inline]
    pub fn write(&mut self, index: usize, value: T) {
        assert!(index < self.len);
        unsafe { self.ptr.add(index).write_volatile(value) }
    }

    pub fn fill(&mut self, value: T) {
        for index in 0..self.len {
            self.write(index, value);
        }
    }

    pub fn copy_from_slice(&mut self, offset: usize, data: &[T]) {
        for (index, value) in data.iter().enumerate() {
            self.write(offset + index, *value);
        }
    }
}
