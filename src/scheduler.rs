//! Round-robin scheduling (spec §4.3, §4.9).
//!
//! The ready queue's tail is always the next process to run; a process
//! that yields or is preempted goes back on the head. When `ready` is
//! empty the idle process runs instead; it is never removed from `ready`
//! permanently, it simply is not placed there at all and is substituted in
//! by name.

use crate::hal::ProcessId;
use crate::pcb::ProcessTable;

/// Pick the next process to run: the tail of `ready`, or `idle` if `ready`
/// is empty. Does not mutate the queue; callers combine this with
/// [`ProcessTable::wake`]/`block` as part of a full dispatch.
#[must_use]
pub fn find_ready_pcb(table: &ProcessTable, idle: ProcessId) -> ProcessId {
    table.ready.back().copied().unwrap_or(idle)
}

/// Move the process at the tail of `ready` to the head (round-robin
/// requeue after a voluntary yield or clock-driven preemption), returning
/// the pid that should run next.
pub fn rotate_ready(table: &mut ProcessTable, idle: ProcessId) -> ProcessId {
    match table.ready.pop_back() {
        Some(pid) => {
            table.ready.push_front(pid);
            pid
        }
        None => idle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimMachine;
    use crate::mm::frame::FrameAllocator;
    use crate::mm::user_table::UserPageTable;
    use crate::pcb::Pcb;

    fn make_pcb(pid: u32, fa: &mut FrameAllocator, m: &mut SimMachine) -> Pcb {
        let pt = UserPageTable::new(16, 1, 1, fa, m).unwrap();
        Pcb::new(ProcessId(pid), pt, [0, 0], None)
    }

    #[test]
    fn empty_ready_queue_falls_back_to_idle() {
        let table = ProcessTable::new();
        assert_eq!(find_ready_pcb(&table, ProcessId(0)), ProcessId(0));
    }

    #[test]
    fn rotate_cycles_through_ready_processes_in_order() {
        let mut fa = FrameAllocator::new(64);
        let mut m = SimMachine::new(64, &[]);
        let mut table = ProcessTable::new();
        table.insert(make_pcb(1, &mut fa, &mut m));
        table.insert(make_pcb(2, &mut fa, &mut m));
        table.insert(make_pcb(3, &mut fa, &mut m));
        // ready (head->tail): 3, 2, 1
        assert_eq!(rotate_ready(&mut table, ProcessId(0)), ProcessId(1));
        // ready: 1, 3, 2
        assert_eq!(rotate_ready(&mut table, ProcessId(0)), ProcessId(2));
        // ready: 2, 1, 3
        assert_eq!(rotate_ready(&mut table, ProcessId(0)), ProcessId(3));
    }
}
