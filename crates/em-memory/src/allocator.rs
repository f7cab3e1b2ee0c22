//! Allocator capability used by the segment mapper

use em_core::error::MemoryError;
use parking_lot::Mutex;
use std::alloc::Layout;
use std::ptr::NonNull;
use tracing::{debug, trace};

/// Source of aligned memory blocks for module mappings.
///
/// The loader never assumes a particular strategy: a firmware pool, a page
/// allocator or the host heap all fit behind this trait.
pub trait Allocator: Send + Sync {
    /// Allocate `size` bytes aligned to `align` (a power of two).
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, MemoryError>;

    /// Release a block returned by [`Allocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr`, `size` and `align` must be exactly those of a live allocation
    /// made by this allocator, and the block must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize);
}

/// Validate an allocation request
pub(crate) fn check_request(size: usize, align: usize) -> Result<Layout, MemoryError> {
    if size == 0 {
        return Err(MemoryError::ZeroSize);
    }
    if align == 0 || !align.is_power_of_two() {
        return Err(MemoryError::InvalidAlignment(align));
    }
    Layout::from_size_align(size, align).map_err(|_| MemoryError::OutOfMemory { size, align })
}

/// Allocation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Live allocations
    pub outstanding: usize,
    /// Bytes held by live allocations
    pub outstanding_bytes: usize,
    /// Allocations made since creation
    pub total_allocations: usize,
    /// Largest value `outstanding_bytes` has reached
    pub peak_bytes: usize,
}

impl AllocStats {
    pub(crate) fn record_alloc(&mut self, size: usize) {
        self.outstanding += 1;
        self.outstanding_bytes += size;
        self.total_allocations += 1;
        self.peak_bytes = self.peak_bytes.max(self.outstanding_bytes);
    }

    pub(crate) fn record_free(&mut self, size: usize) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.outstanding_bytes = self.outstanding_bytes.saturating_sub(size);
    }
}

/// Hosted allocator backed by the global heap.
///
/// An optional byte limit makes allocation exhaustion reproducible.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    limit: Option<usize>,
    stats: Mutex<AllocStats>,
}

impl HeapAllocator {
    /// Create an unlimited heap allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a heap allocator that refuses to hold more than `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            stats: Mutex::new(AllocStats::default()),
        }
    }

    /// Snapshot of the allocation statistics
    pub fn stats(&self) -> AllocStats {
        *self.stats.lock()
    }

    /// Number of live allocations
    pub fn outstanding(&self) -> usize {
        self.stats.lock().outstanding
    }
}

impl Allocator for HeapAllocator {
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, MemoryError> {
        let layout = check_request(size, align)?;

        let mut stats = self.stats.lock();
        if let Some(limit) = self.limit {
            if stats.outstanding_bytes.saturating_add(size) > limit {
                debug!(
                    "Heap allocation of 0x{:x} bytes refused: limit 0x{:x}, in use 0x{:x}",
                    size, limit, stats.outstanding_bytes
                );
                return Err(MemoryError::OutOfMemory { size, align });
            }
        }

        // SAFETY: layout has a non-zero size
        let ptr = unsafe { std::alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or(MemoryError::OutOfMemory { size, align })?;

        stats.record_alloc(size);
        trace!(
            "Heap allocated 0x{:x} bytes at {:p} (align 0x{:x})",
            size,
            ptr,
            align
        );
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        // SAFETY: the caller hands back a live allocation with its original layout
        let layout = Layout::from_size_align_unchecked(size, align);
        std::alloc::dealloc(ptr.as_ptr(), layout);

        self.stats.lock().record_free(size);
        trace!("Heap freed 0x{:x} bytes at {:p}", size, ptr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert_eq!(check_request(0, 8).unwrap_err(), MemoryError::ZeroSize);
        assert_eq!(
            check_request(16, 3).unwrap_err(),
            MemoryError::InvalidAlignment(3)
        );
        assert_eq!(
            check_request(16, 0).unwrap_err(),
            MemoryError::InvalidAlignment(0)
        );
        assert!(check_request(16, 16).is_ok());
    }

    #[test]
    fn test_heap_alignment_and_stats() {
        let heap = HeapAllocator::new();
        let ptr = heap.allocate(0x3000, 0x1000).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 0x1000, 0);

        let stats = heap.stats();
        assert_eq!(stats.outstanding, 1);
        assert_eq!(stats.outstanding_bytes, 0x3000);

        unsafe { heap.free(ptr, 0x3000, 0x1000) };
        let stats = heap.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.outstanding_bytes, 0);
        assert_eq!(stats.total_allocations, 1);
        assert_eq!(stats.peak_bytes, 0x3000);
    }

    #[test]
    fn test_heap_limit() {
        let heap = HeapAllocator::with_limit(0x1000);
        let first = heap.allocate(0x800, 8).unwrap();
        assert_eq!(
            heap.allocate(0x900, 8).unwrap_err(),
            MemoryError::OutOfMemory {
                size: 0x900,
                align: 8,
            }
        );
        unsafe { heap.free(first, 0x800, 8) };
        let second = heap.allocate(0x900, 8).unwrap();
        unsafe { heap.free(second, 0x900, 8) };
        assert_eq!(heap.outstanding(), 0);
    }
}
