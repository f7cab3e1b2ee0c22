//! Owned memory region backing a mapped module

use crate::allocator::Allocator;
use em_core::error::MemoryError;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::trace;

/// A single zero-initialized allocation, addressed by absolute address.
///
/// The region exclusively owns its block and returns it to the allocator
/// when dropped. All accessors are bounds checked against `[start, end)`.
pub struct MappedRegion {
    ptr: NonNull<u8>,
    size: usize,
    align: usize,
    allocator: Arc<dyn Allocator>,
}

// SAFETY: the block is owned exclusively; mutation requires `&mut self`
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Allocate and zero a region of `size` bytes aligned to `align`
    pub fn new(
        allocator: Arc<dyn Allocator>,
        size: usize,
        align: usize,
    ) -> Result<Self, MemoryError> {
        let ptr = allocator.allocate(size, align)?;

        // SAFETY: the allocator returned `size` writable bytes at `ptr`
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, size) };

        trace!("Mapped region of 0x{:x} bytes at {:p}", size, ptr);
        Ok(Self {
            ptr,
            size,
            align,
            allocator,
        })
    }

    /// Absolute address of the first byte
    pub fn start(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Absolute address one past the last byte
    pub fn end(&self) -> usize {
        self.start() + self.size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    /// Check that `[addr, addr + len)` lies inside the region
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.start() && end <= self.end(),
            None => false,
        }
    }

    /// Offset of `addr` from the start, provided `len` bytes fit there
    pub fn offset_of(&self, addr: usize, len: usize) -> Result<usize, MemoryError> {
        if self.contains(addr, len) {
            Ok(addr - self.start())
        } else {
            Err(MemoryError::OutOfBounds { addr, len })
        }
    }

    /// Borrow `len` bytes at `addr`
    pub fn bytes(&self, addr: usize, len: usize) -> Result<&[u8], MemoryError> {
        let offset = self.offset_of(addr, len)?;
        Ok(&self.as_slice()[offset..offset + len])
    }

    /// Borrow everything from `addr` to the end of the region
    pub fn bytes_from(&self, addr: usize) -> Result<&[u8], MemoryError> {
        let offset = self.offset_of(addr, 0)?;
        Ok(&self.as_slice()[offset..])
    }

    /// Copy `data` to `addr`
    pub fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), MemoryError> {
        let offset = self.offset_of(addr, data.len())?;
        self.as_mut_slice()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// The whole region
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for `size` initialized bytes while self lives
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        trace!(
            "Releasing mapped region of 0x{:x} bytes at {:p}",
            self.size,
            self.ptr
        );
        // SAFETY: ptr/size/align are those returned by `allocate` in `new`
        unsafe { self.allocator.free(self.ptr, self.size, self.align) };
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("start", &format_args!("0x{:x}", self.start()))
            .field("size", &format_args!("0x{:x}", self.size))
            .field("align", &format_args!("0x{:x}", self.align))
            .finish()
    }
}
