//! A process's user-region page table (spec §3, §4.5.2, §4.10).
//!
//! Layout, low to high: text (RX), data up to `brk` (RW), a hole, then a
//! stack that grows downward from the top of the region. The hole lets the
//! stack grow without colliding with `brk`, and `brk` grow without
//! colliding with the stack, until they meet (spec §4.10: "growth fails once
//! the hole between data and stack is exhausted").

use crate::error::PagingError;
use crate::hal::{FrameIndex, Machine};
use crate::mm::frame::FrameAllocator;
use crate::mm::{PROT_RW, PROT_RX};

#[derive(Debug, Clone, Copy)]
struct Entry {
    frame: FrameIndex,
    prot: u8,
}

/// One process's user address space.
pub struct UserPageTable {
    region_pages: usize,
    entries: Vec<Option<Entry>>,
    text_pages: usize,
    brk_page: usize,
    /// Lowest currently-mapped stack page (stack grows downward from
    /// `region_pages - 1`).
    stack_low_page: usize,
}

impl UserPageTable {
    /// Build a fresh address space: `text_pages` of RX text at page 0,
    /// `data_pages` of RW data immediately above it, and one RW stack page
    /// at the top of the region (spec §4.5.2's initial layout for a loaded
    /// program).
    pub fn new(
        region_pages: usize,
        text_pages: usize,
        data_pages: usize,
        fa: &mut FrameAllocator,
        machine: &mut impl Machine,
    ) -> Result<Self, PagingError> {
        let mut entries = vec![None; region_pages];
        for page in 0..text_pages {
            let frame = fa.alloc()?;
            entries[page] = Some(Entry { frame, prot: PROT_RX });
        }
        for page in text_pages..text_pages + data_pages {
            let frame = fa.alloc()?;
            machine.zero_frame(frame);
            entries[page] = Some(Entry { frame, prot: PROT_RW });
        }
        let stack_low_page = region_pages - 1;
        let stack_frame = fa.alloc()?;
        machine.zero_frame(stack_frame);
        entries[stack_low_page] = Some(Entry { frame: stack_frame, prot: PROT_RW });
        Ok(Self {
            region_pages,
            entries,
            text_pages,
            brk_page: text_pages + data_pages,
            stack_low_page,
        })
    }

    #[must_use]
    pub fn brk_page(&self) -> usize {
        self.brk_page
    }

    #[must_use]
    pub fn stack_low_page(&self) -> usize {
        self.stack_low_page
    }

    #[must_use]
    pub fn text_pages(&self) -> usize {
        self.text_pages
    }

    #[must_use]
    pub fn region_pages(&self) -> usize {
        self.region_pages
    }

    #[must_use]
    pub fn frame_of(&self, page: usize) -> Option<FrameIndex> {
        self.entries.get(page).and_then(|e| e.map(|e| e.frame))
    }

    #[must_use]
    pub fn is_mapped(&self, page: usize) -> bool {
        page < self.entries.len() && self.entries[page].is_some()
    }

    /// Grow or shrink the data break. Rejects a break at or below the last
    /// text page, or one that would reach (or cross) the lowest currently
    /// mapped stack page (spec §4.5.6).
    pub fn set_brk(
        &mut self,
        new_break_page: usize,
        fa: &mut FrameAllocator,
        machine: &mut impl Machine,
    ) -> Result<(), PagingError> {
        if new_break_page <= self.text_pages || new_break_page >= self.stack_low_page {
            return Err(PagingError::InvalidBreak);
        }
        if new_break_page == self.brk_page {
            return Ok(());
        }
        if new_break_page > self.brk_page {
            for page in self.brk_page..new_break_page {
                let frame = fa.alloc()?;
                machine.zero_frame(frame);
                self.entries[page] = Some(Entry { frame, prot: PROT_RW });
            }
        } else {
            for page in new_break_page..self.brk_page {
                if let Some(entry) = self.entries[page].take() {
                    fa.free(entry.frame);
                }
            }
        }
        machine.flush_user_tlb();
        self.brk_page = new_break_page;
        Ok(())
    }

    /// Grow the stack downward by one page to cover `page` (spec §4.10's
    /// memory trap: a fault just below the mapped stack grows it, unless it
    /// would collide with `brk`). Returns `Err` (the caller kills the
    /// process) if `page` is at or below the break.
    pub fn grow_stack_to(
        &mut self,
        page: usize,
        fa: &mut FrameAllocator,
        machine: &mut impl Machine,
    ) -> Result<(), PagingError> {
        if page >= self.stack_low_page {
            return Ok(());
        }
        if page <= self.brk_page {
            return Err(PagingError::OutOfRange);
        }
        for p in (page..self.stack_low_page).rev() {
            let frame = fa.alloc()?;
            machine.zero_frame(frame);
            self.entries[p] = Some(Entry { frame, prot: PROT_RW });
        }
        self.stack_low_page = page;
        machine.flush_user_tlb();
        Ok(())
    }

    /// Allocate a fresh page table with the same shape (brk, stack extent)
    /// as `parent`, with every page `parent` has mapped backed by a new,
    /// zeroed frame. The caller is responsible for copying contents in
    /// (spec §4.5.1's fork: "allocate a fresh frame ... then memcpy").
    pub fn new_for_fork(
        parent: &UserPageTable,
        fa: &mut FrameAllocator,
        machine: &mut impl Machine,
    ) -> Result<Self, PagingError> {
        let mut entries = vec![None; parent.region_pages];
        for (page, slot) in parent.entries.iter().enumerate() {
            if let Some(e) = slot {
                let frame = fa.alloc()?;
                machine.zero_frame(frame);
                entries[page] = Some(Entry { frame, prot: e.prot });
            }
        }
        Ok(Self {
            region_pages: parent.region_pages,
            entries,
            text_pages: parent.text_pages,
            brk_page: parent.brk_page,
            stack_low_page: parent.stack_low_page,
        })
    }

    /// Free every mapped frame (spec §4.5.3's exit/reap teardown).
    pub fn unmap_all(&mut self, fa: &mut FrameAllocator) {
        for entry in self.entries.iter_mut() {
            if let Some(e) = entry.take() {
                fa.free(e.frame);
            }
        }
    }
}
