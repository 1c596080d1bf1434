//! Process control blocks and the scheduling queues (spec §3, §4.3).

use std::collections::{HashMap, VecDeque};

use crate::hal::{KernelContext, ObjectId, ProcessId, TerminalId, UserContext};
use crate::mm::user_table::UserPageTable;

/// Why a process is on the `blocked` queue or a per-object wait list.
///
/// The clock handler (spec §4.9) only ever scans `blocked`, and only ever
/// acts on `Delay`, `PipeRead`, and the two terminal-write reasons there;
/// `Wait`, `LockWait`, and `CvarWait` are woken by their owning subsystem
/// (`exit`/reap, `Release`, `CvarSignal`/`CvarBroadcast`) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Not blocked; eligible to run (if on `ready`) or currently running.
    None,
    /// `Delay` syscall, woken after the given number of ticks elapse.
    Delay(u64),
    /// `Wait` syscall with no defunct child yet; woken when a child exits.
    Wait,
    /// `PipeRead` found the pipe empty; woken on the next `PipeWrite`.
    PipeRead(ObjectId),
    /// `TtyRead` found the line buffer empty; woken when a line completes.
    TerminalRead(TerminalId),
    /// `TtyWrite` queued but the terminal is busy with a prior transmit.
    TerminalWritePending(TerminalId),
    /// `TtyWrite` handed to the hardware; woken by the transmit-complete trap.
    TerminalWriteInFlight(TerminalId),
    /// `Acquire` found the lock held; woken by `Release`.
    LockWait(ObjectId),
    /// `CvarWait` parked on a condition variable; woken by signal/broadcast.
    CvarWait(ObjectId),
}

/// Staging area for a blocking I/O syscall's result.
///
/// The simulated machine has no addressable user memory the host can copy
/// into directly, so `PipeRead`/`TtyRead` stage their requested length here
/// on block and their delivered bytes here on completion, in place of a
/// real pointer write into the caller's address space (see DESIGN.md).
pub struct PendingIo {
    pub requested_len: usize,
    pub result: Vec<u8>,
}

/// One process's control block.
pub struct Pcb {
    pub pid: ProcessId,
    pub user_context: UserContext,
    pub kernel_context: Option<KernelContext>,
    pub page_table: UserPageTable,
    /// The two kernel-stack frames this PCB owns (spec §4.2's per-process
    /// kernel stack, rewritten into the kernel table's stack slots on
    /// every switch into or out of this process).
    pub kernel_stack_frames: [usize; 2],
    pub parent: Option<ProcessId>,
    pub children: Vec<ProcessId>,
    pub block_reason: BlockReason,
    /// Lock this process currently holds, if any (at most one at a time
    /// per spec §4.7's single-lock-per-process simplification).
    pub held_lock: Option<ObjectId>,
    pub exit_status: Option<i64>,
    pub pending_io: Option<PendingIo>,
    /// Lock to reacquire once a `CvarWait` wakes (spec §4.7's "on
    /// resumption, reacquire the lock via the shared acquire helper").
    pub cvar_wait_lock: Option<ObjectId>,
}

impl Pcb {
    #[must_use]
    pub fn new(
        pid: ProcessId,
        page_table: UserPageTable,
        kernel_stack_frames: [usize; 2],
        parent: Option<ProcessId>,
    ) -> Self {
        Self {
            pid,
            user_context: UserContext::default(),
            kernel_context: None,
            page_table,
            kernel_stack_frames,
            parent,
            children: Vec::new(),
            block_reason: BlockReason::None,
            held_lock: None,
            exit_status: None,
            pending_io: None,
            cvar_wait_lock: None,
        }
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        !matches!(self.block_reason, BlockReason::None)
    }
}

/// The process arena plus the three scheduling queues (spec §4.3).
///
/// `ready` and `defunct` are FIFO: new entries go on the front, the
/// scheduler/reaper takes from the back. `blocked` holds every process
/// whose `block_reason` is one the clock handler scans (`Delay`,
/// `PipeRead`, the terminal-write reasons); lock/cvar waiters live in
/// their owning object's own wait list instead, never in `blocked`.
#[derive(Default)]
pub struct ProcessTable {
    pub processes: HashMap<ProcessId, Pcb>,
    pub ready: VecDeque<ProcessId>,
    pub blocked: VecDeque<ProcessId>,
    pub defunct: VecDeque<ProcessId>,
    pub running: Option<ProcessId>,
}

impl ProcessTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pcb: Pcb) {
        self.ready.push_front(pcb.pid);
        self.processes.insert(pcb.pid, pcb);
    }

    #[must_use]
    pub fn get(&self, pid: ProcessId) -> Option<&Pcb> {
        self.processes.get(&pid)
    }

    #[must_use]
    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Pcb> {
        self.processes.get_mut(&pid)
    }

    /// Move `pid` from `ready` to `blocked` with the given reason. Lock and
    /// cvar waits use [`ProcessTable::block_on_object`] instead.
    pub fn block(&mut self, pid: ProcessId, reason: BlockReason) {
        self.ready.retain(|&p| p != pid);
        if let Some(pcb) = self.processes.get_mut(&pid) {
            pcb.block_reason = reason;
        }
        self.blocked.push_front(pid);
    }

    /// Park `pid` on an object's own wait list (lock/cvar), not `blocked`.
    pub fn block_on_object(&mut self, pid: ProcessId, reason: BlockReason, wait_list: &mut VecDeque<ProcessId>) {
        if let Some(pcb) = self.processes.get_mut(&pid) {
            pcb.block_reason = reason;
        }
        wait_list.push_front(pid);
    }

    /// Move `pid` back onto `ready`, clearing its block reason. Works
    /// whether `pid` came from `blocked` or was removed from an object's
    /// wait list by the caller beforehand.
    pub fn wake(&mut self, pid: ProcessId) {
        self.blocked.retain(|&p| p != pid);
        if let Some(pcb) = self.processes.get_mut(&pid) {
            pcb.block_reason = BlockReason::None;
        }
        self.ready.push_front(pid);
    }

    /// Move the running process to `defunct` (spec §4.5.3's exit).
    pub fn retire(&mut self, pid: ProcessId) {
        self.ready.retain(|&p| p != pid);
        self.blocked.retain(|&p| p != pid);
        self.defunct.push_front(pid);
        if self.running == Some(pid) {
            self.running = None;
        }
    }

    /// Drop a defunct PCB entirely once its parent has reaped it.
    pub fn reap(&mut self, pid: ProcessId) -> Option<Pcb> {
        self.defunct.retain(|&p| p != pid);
        self.processes.remove(&pid)
    }

    /// Panic if the queue invariants spec §8's Testable Properties rely on
    /// have been violated: `ready`/`blocked`/`defunct` are pairwise
    /// disjoint, the running process is in none of them, and every queued
    /// pid still has a live PCB. Only compiled in with `strict-invariants`;
    /// call sites pay nothing for it otherwise.
    #[cfg(feature = "strict-invariants")]
    pub fn check_invariants(&self) {
        let sets = [&self.ready, &self.blocked, &self.defunct];
        for (i, a) in sets.iter().enumerate() {
            for pid in a.iter() {
                assert!(self.processes.contains_key(pid), "queued pid {pid:?} has no PCB");
                assert_ne!(Some(*pid), self.running, "running pid {pid:?} also queued");
                for b in &sets[i + 1..] {
                    assert!(!b.contains(pid), "pid {pid:?} is on more than one queue");
                }
            }
        }
    }
}
