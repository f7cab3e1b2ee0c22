//! Segment mapping
//!
//! All `PT_LOAD` segments of a module share one allocation. The span
//! `[min_alloc, max_alloc)` of their virtual addresses, rounded out to the
//! largest segment alignment, is allocated once; the load bias then maps
//! file addresses onto that block.

use crate::elf::{Elf32Phdr, ElfImage};
use em_core::error::LoaderError;
use em_memory::{align_down, align_up, Allocator, MappedRegion};
use std::sync::Arc;
use tracing::debug;

/// Address span of the loadable segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLayout {
    /// Lowest `p_vaddr` of any loadable segment
    pub min_addr: usize,
    /// Highest `p_vaddr + p_memsz` of any loadable segment
    pub max_addr: usize,
    /// Largest segment alignment, at least pointer width
    pub max_align: usize,
    /// `min_addr` rounded down to `max_align`
    pub min_alloc: usize,
    /// `max_addr` rounded up to `max_align`
    pub max_alloc: usize,
}

impl LoadLayout {
    /// Compute the layout of the `PT_LOAD` entries in `phdrs`
    pub fn compute(phdrs: &[Elf32Phdr]) -> Result<Self, LoaderError> {
        let mut min_addr: Option<usize> = None;
        let mut max_addr = 0usize;
        let mut max_align = std::mem::size_of::<usize>();

        for phdr in phdrs.iter().filter(|p| p.is_load()) {
            // Checked in the image's 32-bit width
            let end = phdr.p_vaddr.checked_add(phdr.p_memsz).ok_or_else(|| {
                LoaderError::MalformedSegment(format!(
                    "segment at 0x{:08x} with size 0x{:x} overflows the address space",
                    phdr.p_vaddr, phdr.p_memsz
                ))
            })?;
            let vaddr = phdr.p_vaddr as usize;
            let end = end as usize;

            let align = phdr.p_align as usize;
            if align > 1 && !align.is_power_of_two() {
                return Err(LoaderError::MalformedSegment(format!(
                    "segment at 0x{:08x} has alignment 0x{:x}, not a power of two",
                    phdr.p_vaddr, phdr.p_align
                )));
            }

            min_addr = Some(min_addr.map_or(vaddr, |min| min.min(vaddr)));
            max_addr = max_addr.max(end);
            max_align = max_align.max(align);
        }

        let min_addr = min_addr.ok_or(LoaderError::NoLoadableSegments)?;
        if max_addr <= min_addr {
            return Err(LoaderError::NoLoadableSegments);
        }

        let min_alloc = align_down(min_addr, max_align);
        let max_alloc = align_up(max_addr, max_align)
            .filter(|&end| end <= u32::MAX as usize)
            .ok_or_else(|| {
                LoaderError::MalformedSegment(format!(
                    "end address 0x{:x} cannot be aligned to 0x{:x}",
                    max_addr, max_align
                ))
            })?;

        Ok(Self {
            min_addr,
            max_addr,
            max_align,
            min_alloc,
            max_alloc,
        })
    }

    /// Bytes to allocate for the module
    pub fn size(&self) -> usize {
        self.max_alloc - self.min_alloc
    }
}

/// Segments copied into their allocation
#[derive(Debug)]
pub struct MappedImage {
    pub region: MappedRegion,
    /// Load bias: mapped address of file vaddr 0
    pub base_addr: usize,
}

impl MappedImage {
    /// Mapped address of a file virtual address
    pub fn address_of(&self, vaddr: u32) -> usize {
        self.base_addr.wrapping_add(vaddr as usize)
    }
}

/// Check a loadable segment against the image before anything is allocated
fn check_segment(image: &ElfImage<'_>, phdr: &Elf32Phdr, index: usize) -> Result<(), LoaderError> {
    if phdr.p_filesz > phdr.p_memsz {
        return Err(LoaderError::MalformedSegment(format!(
            "segment {} has file size 0x{:x} larger than memory size 0x{:x}",
            index, phdr.p_filesz, phdr.p_memsz
        )));
    }

    image
        .range(
            "segment data",
            phdr.p_offset as usize,
            phdr.p_filesz as usize,
        )
        .map(|_| ())
}

/// Allocate the module block and copy every loadable segment into it.
///
/// The block is zeroed before the copies, so the `[p_filesz, p_memsz)` tail
/// of each segment reads as zero.
pub fn map_segments(
    image: &ElfImage<'_>,
    phdrs: &[Elf32Phdr],
    layout: &LoadLayout,
    allocator: Arc<dyn Allocator>,
) -> Result<MappedImage, LoaderError> {
    for (i, phdr) in phdrs.iter().enumerate().filter(|(_, p)| p.is_load()) {
        check_segment(image, phdr, i)?;
    }

    let mut region = MappedRegion::new(allocator, layout.size(), layout.max_align)
        .map_err(LoaderError::AllocationFailed)?;
    let base_addr = region.start().wrapping_sub(layout.min_alloc);

    for (i, phdr) in phdrs.iter().enumerate().filter(|(_, p)| p.is_load()) {
        let dest = base_addr.wrapping_add(phdr.p_vaddr as usize);
        let data = image.range(
            "segment data",
            phdr.p_offset as usize,
            phdr.p_filesz as usize,
        )?;

        region.write(dest, data).map_err(|e| {
            LoaderError::MalformedSegment(format!("segment {} does not fit the mapping: {}", i, e))
        })?;

        debug!(
            "Loadable segment {} of size 0x{:08x} copied from vaddr 0x{:08x} at 0x{:x} ({:?})",
            i,
            phdr.p_filesz,
            phdr.p_vaddr,
            dest,
            phdr.flags()
        );
    }

    debug!(
        "Base address: 0x{:x}, aligned at 0x{:x}, module size: 0x{:x}",
        base_addr,
        layout.max_align,
        layout.size()
    );

    Ok(MappedImage { region, base_addr })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::pt;

    fn load(vaddr: u32, memsz: u32, align: u32) -> Elf32Phdr {
        Elf32Phdr {
            p_type: pt::LOAD,
            p_vaddr: vaddr,
            p_memsz: memsz,
            p_filesz: 0,
            p_align: align,
            ..Default::default()
        }
    }

    #[test]
    fn test_layout_single_segment() {
        let layout = LoadLayout::compute(&[load(0x1234, 0x100, 0x1000)]).unwrap();
        assert_eq!(layout.min_addr, 0x1234);
        assert_eq!(layout.max_addr, 0x1334);
        assert_eq!(layout.max_align, 0x1000);
        assert_eq!(layout.min_alloc, 0x1000);
        assert_eq!(layout.max_alloc, 0x2000);
        assert_eq!(layout.size(), 0x1000);
    }

    #[test]
    fn test_layout_multiple_segments() {
        let phdrs = [
            Elf32Phdr {
                p_type: pt::DYNAMIC,
                p_vaddr: 0,
                p_memsz: 0x10_0000,
                ..Default::default()
            },
            load(0x3000, 0x800, 0x1000),
            load(0x1000, 0x10, 0x10),
            load(0x4000, 0x1001, 0x20),
        ];
        let layout = LoadLayout::compute(&phdrs).unwrap();
        assert_eq!(layout.min_addr, 0x1000);
        assert_eq!(layout.max_addr, 0x5001);
        assert_eq!(layout.max_align, 0x1000);
        assert_eq!(layout.min_alloc, 0x1000);
        assert_eq!(layout.max_alloc, 0x6000);
    }

    #[test]
    fn test_layout_alignment_floor() {
        let layout = LoadLayout::compute(&[load(0x13, 0x5, 0)]).unwrap();
        let word = std::mem::size_of::<usize>();
        assert_eq!(layout.max_align, word);
        assert_eq!(layout.min_alloc, align_down(0x13, word));
        assert_eq!(layout.max_alloc, align_up(0x18, word).unwrap());
    }

    #[test]
    fn test_layout_no_loadable_segments() {
        assert_eq!(
            LoadLayout::compute(&[]),
            Err(LoaderError::NoLoadableSegments)
        );
        assert_eq!(
            LoadLayout::compute(&[load(0x1000, 0, 0x1000)]),
            Err(LoaderError::NoLoadableSegments)
        );
    }

    #[test]
    fn test_layout_bad_alignment() {
        assert!(matches!(
            LoadLayout::compute(&[load(0x1000, 0x10, 0x30)]),
            Err(LoaderError::MalformedSegment(_))
        ));
    }

    #[test]
    fn test_layout_wraps_address_space() {
        assert!(matches!(
            LoadLayout::compute(&[load(0xFFFF_F000, 0x2000, 0x1000)]),
            Err(LoaderError::MalformedSegment(_))
        ));
        assert!(matches!(
            LoadLayout::compute(&[
                load(0xFFFF_F000, 0x800, 0x1000),
                load(0x1000, 0x10, 0x2000),
            ]),
            Err(LoaderError::MalformedSegment(_))
        ));

        assert!(matches!(
            LoadLayout::compute(&[load(0xFFFF_F000, 0x1000, 0x1000)]),
            Err(LoaderError::MalformedSegment(_))
        ));

        let layout = LoadLayout::compute(&[load(0xFFFF_E000, 0x800, 0x1000)]).unwrap();
        assert_eq!(layout.max_alloc, 0xFFFF_F000);
    }
}
