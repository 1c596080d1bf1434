//! The `Clone` and `Switch` context-switch trampolines (spec §4.4).
//!
//! These are the two primitives every other blocking or process-creating
//! syscall builds on: `clone_into` duplicates a running process's kernel
//! and user state into a brand new PCB (fork's core), and `switch_to`
//! rewrites the kernel-stack mapping and hands control to a different
//! process (the scheduler's core).

use crate::hal::Machine;
use crate::mm::frame::FrameAllocator;
use crate::mm::kernel_table::KernelPageTable;
use crate::pcb::{Pcb, ProcessTable};

/// Duplicate `src`'s kernel context into `dest` via the machine's clone
/// contract, and copy every mapped user page from `src` into `dest`'s
/// already-allocated page table frame-for-frame using the kernel table's
/// scratch slot as the copy window (spec §4.4, §4.5.1).
pub fn clone_into(
    table: &mut ProcessTable,
    kernel_table: &mut KernelPageTable,
    _fa: &mut FrameAllocator,
    machine: &mut impl Machine,
    src_pid: crate::hal::ProcessId,
    dest_pid: crate::hal::ProcessId,
) {
    let src_kernel_ctx = table.get(src_pid).and_then(|p| p.kernel_context);
    let dest_region_pages = table.get(dest_pid).map(|p| p.page_table.region_pages());

    if let (Some(src_ctx), Some(region_pages)) = (src_kernel_ctx, dest_region_pages) {
        let cloned = machine.clone_kernel_context(src_ctx, dest_pid);
        if let Some(dest) = table.get_mut(dest_pid) {
            dest.kernel_context = Some(cloned);
        }

        for page in 0..region_pages {
            let src_frame = table.get(src_pid).and_then(|p| p.page_table.frame_of(page));
            let dest_frame = table.get(dest_pid).and_then(|p| p.page_table.frame_of(page));
            if let (Some(sf), Some(df)) = (src_frame, dest_frame) {
                kernel_table.map_scratch(sf, crate::mm::PROT_RW);
                machine.copy_frame(sf, df);
                kernel_table.unmap_scratch(machine);
            }
        }
    }

    if let Some(src) = table.get(src_pid) {
        let ctx = src.user_context;
        if let Some(dest) = table.get_mut(dest_pid) {
            dest.user_context = ctx;
        }
    }
}

/// Rewrite the kernel table's two stack slots to `to`'s kernel-stack
/// frames, flush the kernel TLB, obtain a fresh kernel context for `to`
/// from the machine, and mark it running (spec §4.4's switch trampoline).
pub fn switch_to(
    table: &mut ProcessTable,
    kernel_table: &mut KernelPageTable,
    machine: &mut impl Machine,
    to: crate::hal::ProcessId,
) {
    if let Some(pcb) = table.get(to) {
        let [slot0, slot1] = pcb.kernel_stack_frames;
        kernel_table.rewrite_stack_slot(0, slot0);
        kernel_table.rewrite_stack_slot(1, slot1);
    }
    machine.flush_kernel_tlb();
    let ctx = machine.switch_kernel_context(to);
    if let Some(pcb) = table.get_mut(to) {
        pcb.kernel_context = Some(ctx);
    }
    table.running = Some(to);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimMachine;
    use crate::hal::ProcessId;
    use crate::mm::user_table::UserPageTable;

    fn pcb_with_stack(
        pid: u32,
        fa: &mut FrameAllocator,
        m: &mut SimMachine,
        parent: Option<ProcessId>,
    ) -> Pcb {
        let pt = UserPageTable::new(16, 1, 1, fa, m).unwrap();
        let s0 = fa.alloc().unwrap();
        let s1 = fa.alloc().unwrap();
        Pcb::new(ProcessId(pid), pt, [s0, s1], parent)
    }

    #[test]
    fn switch_to_rewrites_stack_slots_and_sets_running() {
        let mut fa = FrameAllocator::new(64);
        let mut m = SimMachine::new(64, &[]);
        let mut kt = KernelPageTable::new(16, 1, &mut fa);
        let mut table = ProcessTable::new();
        table.insert(pcb_with_stack(1, &mut fa, &mut m, None));

        switch_to(&mut table, &mut kt, &mut m, ProcessId(1));

        assert_eq!(table.running, Some(ProcessId(1)));
        let pcb = table.get(ProcessId(1)).unwrap();
        assert_eq!(kt.stack_slot_frame(0), Some(pcb.kernel_stack_frames[0]));
        assert_eq!(kt.stack_slot_frame(1), Some(pcb.kernel_stack_frames[1]));
        assert_eq!(m.kernel_tlb_flushes(), 1);
    }

    #[test]
    fn clone_into_duplicates_user_pages() {
        let mut fa = FrameAllocator::new(64);
        let mut m = SimMachine::new(64, &[]);
        let mut kt = KernelPageTable::new(16, 1, &mut fa);
        let mut table = ProcessTable::new();

        let mut parent = pcb_with_stack(1, &mut fa, &mut m, None);
        parent.kernel_context = Some(m.switch_kernel_context(ProcessId(1)));
        let src_text_frame = parent.page_table.frame_of(0).unwrap();
        table.insert(parent);
        m.write_at(src_text_frame, 0, b"marker");

        table.insert(pcb_with_stack(2, &mut fa, &mut m, Some(ProcessId(1))));

        clone_into(&mut table, &mut kt, &mut fa, &mut m, ProcessId(1), ProcessId(2));

        let dest_text_frame = table.get(ProcessId(2)).unwrap().page_table.frame_of(0).unwrap();
        assert_eq!(&m.frame(dest_text_frame)[0..6], b"marker");
        assert!(table.get(ProcessId(2)).unwrap().kernel_context.is_some());
    }
}
