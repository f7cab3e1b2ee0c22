//! Fixed-pool page allocator
//!
//! Models the memory a boot stage owns before any OS exists: a single
//! contiguous pool carved into 4KB pages and tracked by a bitmap.

use crate::allocator::{check_request, AllocStats, Allocator};
use em_core::error::MemoryError;
use parking_lot::{Mutex, RwLock};
use std::alloc::Layout;
use std::ptr::NonNull;
use tracing::{debug, trace};

/// Page granularity of the pool
pub const PAGE_SIZE: usize = 0x1000;

/// Round `value` down to a multiple of `align` (a power of two)
pub fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Round `value` up to a multiple of `align` (a power of two)
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    value.checked_add(align - 1).map(|v| align_down(v, align))
}

/// Page allocator over a fixed, page-aligned pool
pub struct PageAllocator {
    /// Base pointer of the pool
    base: NonNull<u8>,
    /// Number of pages in the pool
    num_pages: usize,
    /// Allocation bitmap (one bit per page)
    allocation_map: RwLock<Vec<u64>>,
    stats: Mutex<AllocStats>,
}

// SAFETY: the pool is only handed out in disjoint blocks and the bitmap is locked
unsafe impl Send for PageAllocator {}
unsafe impl Sync for PageAllocator {}

impl PageAllocator {
    /// Create a pool of `num_pages` pages
    pub fn new(num_pages: usize) -> Result<Self, MemoryError> {
        let size = num_pages
            .checked_mul(PAGE_SIZE)
            .ok_or(MemoryError::OutOfMemory {
                size: usize::MAX,
                align: PAGE_SIZE,
            })?;
        let layout = check_request(size, PAGE_SIZE)?;

        // SAFETY: layout has a non-zero size
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        let base = NonNull::new(base).ok_or(MemoryError::OutOfMemory {
            size,
            align: PAGE_SIZE,
        })?;

        debug!("Page pool created: {} pages at {:p}", num_pages, base);

        Ok(Self {
            base,
            num_pages,
            allocation_map: RwLock::new(vec![0u64; num_pages.div_ceil(64)]),
            stats: Mutex::new(AllocStats::default()),
        })
    }

    /// Total pages in the pool
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Pages currently free
    pub fn free_pages(&self) -> usize {
        let map = self.allocation_map.read();
        (0..self.num_pages).filter(|&page| !Self::is_set(&map, page)).count()
    }

    /// Snapshot of the allocation statistics
    pub fn stats(&self) -> AllocStats {
        *self.stats.lock()
    }

    fn is_set(map: &[u64], page: usize) -> bool {
        map[page / 64] & (1u64 << (page % 64)) != 0
    }

    fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }
}

impl Allocator for PageAllocator {
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, MemoryError> {
        check_request(size, align)?;
        let num_pages = size.div_ceil(PAGE_SIZE);
        // Alignments below a page are satisfied by any page boundary
        let page_step = (align / PAGE_SIZE).max(1);

        let mut allocation_map = self.allocation_map.write();

        // The pool base is page aligned, so only the first page index needs offsetting
        let first_aligned = align_up(self.base_addr(), align)
            .map(|addr| (addr - self.base_addr()) / PAGE_SIZE)
            .ok_or(MemoryError::OutOfMemory { size, align })?;

        let mut start = first_aligned;
        let mut found = None;
        while start + num_pages <= self.num_pages {
            match (start..start + num_pages).find(|&page| Self::is_set(&allocation_map, page)) {
                None => {
                    found = Some(start);
                    break;
                }
                Some(used) => {
                    // Skip past the used page, keeping the alignment stride
                    let skip = used + 1 - first_aligned;
                    start = first_aligned + skip.div_ceil(page_step) * page_step;
                }
            }
        }

        let start_page = found.ok_or(MemoryError::OutOfMemory { size, align })?;

        // Mark pages as allocated
        for page in start_page..start_page + num_pages {
            allocation_map[page / 64] |= 1u64 << (page % 64);
        }

        self.stats.lock().record_alloc(num_pages * PAGE_SIZE);

        // SAFETY: start_page + num_pages is within the pool
        let ptr = unsafe { self.base.as_ptr().add(start_page * PAGE_SIZE) };
        trace!("Page pool allocated {} pages at {:p}", num_pages, ptr);
        NonNull::new(ptr).ok_or(MemoryError::OutOfMemory { size, align })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, _align: usize) {
        let start_page = (ptr.as_ptr() as usize - self.base_addr()) / PAGE_SIZE;
        let num_pages = size.div_ceil(PAGE_SIZE);

        let mut allocation_map = self.allocation_map.write();
        for page in start_page..(start_page + num_pages).min(self.num_pages) {
            allocation_map[page / 64] &= !(1u64 << (page % 64));
        }

        self.stats.lock().record_free(num_pages * PAGE_SIZE);
        trace!("Page pool freed {} pages at {:p}", num_pages, ptr);
    }
}

impl Drop for PageAllocator {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.num_pages * PAGE_SIZE, PAGE_SIZE);
        if let Ok(layout) = layout {
            // SAFETY: base was allocated with this layout in `new`
            unsafe { std::alloc::dealloc(self.base.as_ptr(), layout) };
        }
    }
}
