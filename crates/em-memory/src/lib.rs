//! Memory capability for the elfmod module loader
//!
//! The loader maps every module into one block obtained from an
//! [`Allocator`]. [`MappedRegion`] owns that block and frees it on drop.

pub mod allocator;
pub mod pages;
pub mod region;

pub use allocator::{AllocStats, Allocator, HeapAllocator};
pub use pages::{align_down, align_up, PageAllocator, PAGE_SIZE};
pub use region::MappedRegion;
