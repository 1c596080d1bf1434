//! Software simulation of the machine.
//!
//! This is the only [`Machine`] implementation in the crate. It stands in
//! for the real simulated hardware spec.md treats as an external
//! collaborator: physical RAM is a flat `Vec` of frames, "registers" are
//! plain fields, and `TtyTransmit` completion is reported by draining a
//! queue instead of firing a real trap.

use std::collections::{HashMap, VecDeque};

use super::{
    FrameIndex, KernelContext, LoadError, Machine, PAGE_SIZE, ProcessId, ProgramImage, TerminalId,
};

/// Hardware-reported maximum for one `TtyTransmit` call.
pub const TERMINAL_MAX_LINE: usize = 64;

/// One outstanding transmit the simulated UART hasn't "finished" yet.
struct PendingTransmit {
    tty: TerminalId,
    #[allow(dead_code)]
    len: usize,
}

/// A software stand-in for the simulated machine.
pub struct SimMachine {
    frames: Vec<[u8; PAGE_SIZE]>,
    next_pid: u32,
    programs: HashMap<&'static str, ProgramImage>,
    pending_transmits: VecDeque<PendingTransmit>,
    kernel_tlb_flushes: u64,
    user_tlb_flushes: u64,
    aborted: bool,
}

impl SimMachine {
    /// Build a machine with `frame_count` physical frames and the given
    /// table of loadable program images (name, text pages, data pages,
    /// entry address), standing in for the disk images `LoadProgram`
    /// would read in a real deployment.
    #[must_use]
    pub fn new(frame_count: usize, programs: &[(&'static str, usize, usize, u64)]) -> Self {
        let mut table = HashMap::new();
        for &(name, text_pages, data_pages, entry) in programs {
            table.insert(name, ProgramImage { text_pages, data_pages, entry });
        }
        Self {
            frames: vec![[0u8; PAGE_SIZE]; frame_count],
            next_pid: 1,
            programs: table,
            pending_transmits: VecDeque::new(),
            kernel_tlb_flushes: 0,
            user_tlb_flushes: 0,
            aborted: false,
        }
    }

    /// A small machine preloaded with the two boot programs and the demo
    /// programs spec.md's scenarios name (`test/init`, `idle`, `test/echo`).
    #[must_use]
    pub fn with_default_programs(frame_count: usize) -> Self {
        Self::new(
            frame_count,
            &[
                ("test/init", 1, 1, 0x1000),
                ("idle", 1, 1, 0x1000),
                ("test/echo", 1, 1, 0x1000),
            ],
        )
    }

    /// Read a frame's contents (test/demo introspection only).
    #[must_use]
    pub fn frame(&self, frame: FrameIndex) -> &[u8; PAGE_SIZE] {
        &self.frames[frame]
    }

    /// Write bytes at an offset inside a frame (test/demo setup only).
    pub fn write_at(&mut self, frame: FrameIndex, offset: usize, data: &[u8]) {
        self.frames[frame][offset..offset + data.len()].copy_from_slice(data);
    }

    /// Number of kernel-region TLB flushes performed so far.
    #[must_use]
    pub fn kernel_tlb_flushes(&self) -> u64 {
        self.kernel_tlb_flushes
    }

    /// Number of user-region TLB flushes performed so far.
    #[must_use]
    pub fn user_tlb_flushes(&self) -> u64 {
        self.user_tlb_flushes
    }

    /// Whether [`Machine::abort`] has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Complete every transmit currently in flight on `tty`, calling `on_complete`
    /// once per completion. Models the TTY-transmit trap firing.
    pub fn drain_transmit_completions(&mut self, tty: TerminalId, mut on_complete: impl FnMut()) {
        let mut remaining = VecDeque::new();
        while let Some(p) = self.pending_transmits.pop_front() {
            if p.tty == tty {
                on_complete();
            } else {
                remaining.push_back(p);
            }
        }
        self.pending_transmits = remaining;
    }
}

impl Machine for SimMachine {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn zero_frame(&mut self, frame: FrameIndex) {
        self.frames[frame] = [0u8; PAGE_SIZE];
    }

    fn copy_frame(&mut self, src: FrameIndex, dst: FrameIndex) {
        if src == dst {
            return;
        }
        let src_data = self.frames[src];
        self.frames[dst] = src_data;
    }

    fn flush_kernel_tlb(&mut self) {
        self.kernel_tlb_flushes += 1;
    }

    fn flush_user_tlb(&mut self) {
        self.user_tlb_flushes += 1;
    }

    fn alloc_pid(&mut self) -> ProcessId {
        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;
        pid
    }

    fn retire_pid(&mut self, _pid: ProcessId) {}

    fn clone_kernel_context(&mut self, _from: KernelContext, dest: ProcessId) -> KernelContext {
        KernelContext(dest)
    }

    fn switch_kernel_context(&mut self, to: ProcessId) -> KernelContext {
        KernelContext(to)
    }

    fn load_program(&mut self, path: &str) -> Result<ProgramImage, LoadError> {
        self.programs.get(path).cloned().ok_or(LoadError)
    }

    fn tty_transmit(&mut self, tty: TerminalId, buf: &[u8]) {
        self.pending_transmits.push_back(PendingTransmit { tty, len: buf.len() });
    }

    fn tty_max_line(&self) -> usize {
        TERMINAL_MAX_LINE
    }

    fn abort(&mut self, reason: &str) -> ! {
        self.aborted = true;
        panic!("machine halted: {reason}");
    }
}
