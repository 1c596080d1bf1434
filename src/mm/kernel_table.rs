//! The kernel region's page table and kernel break (spec §3, §4.2).
//!
//! Layout, low to high: text pages (RX), data/heap pages (RW) grown by the
//! kernel break, a scratch page used to temporarily map a frame during
//! fork/clone copies, and two kernel-stack slots at the top of the region
//! whose backing frames are rewritten on every context switch.

use crate::error::PagingError;
use crate::hal::{FrameIndex, Machine};
use crate::mm::frame::FrameAllocator;
use crate::mm::{PROT_RW, PROT_RX};

/// One kernel-region page-table entry.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub frame: FrameIndex,
    pub prot: u8,
}

/// The kernel region's page table.
pub struct KernelPageTable {
    entries: Vec<Option<Entry>>,
    text_pages: usize,
    boot_break_page: usize,
    brk_page: usize,
    scratch_page: usize,
    stack_slots: [usize; 2],
    vm_enabled: bool,
}

impl KernelPageTable {
    /// Build the kernel region with `region_pages` virtual pages total and
    /// `text_pages` of read+execute text at the bottom. The top two pages
    /// are reserved as kernel-stack slots, the page below those as scratch.
    /// VM starts disabled: the pre-VM identity-map path (spec §4.2) is in
    /// effect until [`KernelPageTable::enable_vm`] is called.
    #[must_use]
    pub fn new(region_pages: usize, text_pages: usize, fa: &mut FrameAllocator) -> Self {
        assert!(region_pages > text_pages + 3, "kernel region too small");
        let mut entries = vec![None; region_pages];
        for page in 0..text_pages {
            // Identity-mapped during boot: frame == page (pre-VM path).
            fa.mark_used(page);
            entries[page] = Some(Entry { frame: page, prot: PROT_RX });
        }
        let stack_slots = [region_pages - 1, region_pages - 2];
        let scratch_page = region_pages - 3;
        Self {
            entries,
            text_pages,
            boot_break_page: text_pages,
            brk_page: text_pages,
            scratch_page,
            stack_slots,
            vm_enabled: false,
        }
    }

    /// Switch on the post-boot mapping discipline: `set_brk` now allocates
    /// frames from `fa` instead of identity-mapping, and shrinking below
    /// the boot break becomes possible to reject cleanly (spec §4.2).
    pub fn enable_vm(&mut self) {
        self.vm_enabled = true;
    }

    #[must_use]
    pub fn brk_page(&self) -> usize {
        self.brk_page
    }

    #[must_use]
    pub fn stack_slot_page(&self, slot: usize) -> usize {
        self.stack_slots[slot]
    }

    #[must_use]
    pub fn scratch_page(&self) -> usize {
        self.scratch_page
    }

    fn lowest_reserved_page(&self) -> usize {
        self.scratch_page
    }

    /// Grow or shrink the kernel break to `new_break_page` (exclusive upper
    /// bound on mapped heap pages). Rejects shrinking below the original
    /// boot break, and growing into (or within one page of) the kernel
    /// stack slots.
    pub fn set_brk(
        &mut self,
        new_break_page: usize,
        fa: &mut FrameAllocator,
        machine: &mut impl Machine,
    ) -> Result<(), PagingError> {
        if new_break_page == self.brk_page {
            return Ok(());
        }
        if new_break_page > self.brk_page {
            if new_break_page + 1 >= self.lowest_reserved_page() {
                return Err(PagingError::IntoKernelStack);
            }
            for page in self.brk_page..new_break_page {
                if self.vm_enabled {
                    let frame = fa.alloc()?;
                    machine.zero_frame(frame);
                    self.entries[page] = Some(Entry { frame, prot: PROT_RW });
                } else {
                    // Pre-VM: identity map and keep the allocator in sync.
                    fa.mark_used(page);
                    self.entries[page] = Some(Entry { frame: page, prot: PROT_RW });
                }
            }
        } else {
            if !self.vm_enabled {
                return Err(PagingError::BelowBootBreak);
            }
            if new_break_page < self.boot_break_page {
                return Err(PagingError::BelowBootBreak);
            }
            for page in new_break_page..self.brk_page {
                if let Some(entry) = self.entries[page].take() {
                    machine.zero_frame(entry.frame);
                    fa.free(entry.frame);
                }
            }
            machine.flush_kernel_tlb();
        }
        self.brk_page = new_break_page;
        Ok(())
    }

    /// Map a frame into the scratch slot (spec §4.4/§4.5.1's temporary
    /// mapping), overwriting whatever was mapped there previously.
    pub fn map_scratch(&mut self, frame: FrameIndex, prot: u8) {
        self.entries[self.scratch_page] = Some(Entry { frame, prot });
    }

    /// Tear down the scratch mapping and flush the kernel TLB.
    pub fn unmap_scratch(&mut self, machine: &mut impl Machine) {
        self.entries[self.scratch_page] = None;
        machine.flush_kernel_tlb();
    }

    /// Rewrite one of the two kernel-stack slots to point at `frame`
    /// (the `Switch`/`Clone` trampolines' core side effect, spec §4.4).
    pub fn rewrite_stack_slot(&mut self, slot: usize, frame: FrameIndex) {
        self.entries[self.stack_slots[slot]] = Some(Entry { frame, prot: PROT_RW });
    }

    #[must_use]
    pub fn stack_slot_frame(&self, slot: usize) -> Option<FrameIndex> {
        self.entries[self.stack_slots[slot]].map(|e| e.frame)
    }

    #[must_use]
    pub fn text_pages(&self) -> usize {
        self.text_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimMachine;

    fn setup() -> (KernelPageTable, FrameAllocator, SimMachine) {
        let mut fa = FrameAllocator::new(64);
        let kt = KernelPageTable::new(16, 2, &mut fa);
        (kt, fa, SimMachine::new(64, &[]))
    }

    #[test]
    fn pre_vm_growth_identity_maps_and_rejects_shrink() {
        let (mut kt, mut fa, mut m) = setup();
        kt.set_brk(4, &mut fa, &mut m).unwrap();
        assert_eq!(kt.brk_page(), 4);
        assert_eq!(kt.stack_slot_page(0), 15);
        assert!(fa.used_count() >= 4);
        assert_eq!(kt.set_brk(2, &mut fa, &mut m), Err(PagingError::BelowBootBreak));
    }

    #[test]
    fn post_vm_shrink_frees_frames() {
        let (mut kt, mut fa, mut m) = setup();
        kt.enable_vm();
        kt.set_brk(6, &mut fa, &mut m).unwrap();
        let used_before = fa.used_count();
        kt.set_brk(4, &mut fa, &mut m).unwrap();
        assert!(fa.used_count() < used_before);
        assert_eq!(m.kernel_tlb_flushes(), 1);
    }

    #[test]
    fn growth_into_stack_slots_is_rejected() {
        let (mut kt, mut fa, mut m) = setup();
        kt.enable_vm();
        // region has 16 pages, slots at 15/14, scratch at 13: brk can't
        // reach within one page of 13.
        assert_eq!(kt.set_brk(13, &mut fa, &mut m), Err(PagingError::IntoKernelStack));
    }

    #[test]
    fn scratch_mapping_round_trips() {
        let (mut kt, mut fa, mut m) = setup();
        let frame = fa.alloc().unwrap();
        kt.map_scratch(frame, PROT_RW);
        assert_eq!(kt.entries[kt.scratch_page()].unwrap().frame, frame);
        kt.unmap_scratch(&mut m);
        assert!(kt.entries[kt.scratch_page()].is_none());
        assert_eq!(m.kernel_tlb_flushes(), 1);
    }
}
