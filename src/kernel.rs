//! The single kernel struct bundling every piece of global state (spec §9
//! Design Notes: "collect these globals into a single kernel struct").

use std::collections::HashMap;

use log::info;

use crate::context::switch_to;
use crate::error::{KernelError, KernelResult};
use crate::hal::{Machine, ObjectId, ProcessId};
use crate::mm::frame::FrameAllocator;
use crate::mm::kernel_table::KernelPageTable;
use crate::mm::user_table::UserPageTable;
use crate::pcb::{Pcb, ProcessTable};
use crate::pipe::Pipe;
use crate::sync::{Cvar, Lock};
use crate::tty::Terminal;

/// Fixed pipe ring-buffer capacity. Not part of the syscall ABI, an
/// implementation detail of `PipeInit` (spec §4.6 leaves capacity
/// unspecified beyond "fixed").
pub const PIPE_CAPACITY: usize = 256;

/// Every piece of kernel-wide mutable state, generic over the machine it
/// drives (spec §9's single-struct guidance).
pub struct Kernel<M: Machine> {
    pub machine: M,
    pub frames: FrameAllocator,
    pub kernel_table: KernelPageTable,
    pub table: ProcessTable,
    pub pipes: HashMap<ObjectId, Pipe>,
    pub locks: HashMap<ObjectId, Lock>,
    pub cvars: HashMap<ObjectId, Cvar>,
    pub terminals: Vec<Terminal>,
    pub idle_pid: ProcessId,
    pub init_pid: ProcessId,
    pub user_region_pages: usize,
    pub ticks: u64,
    next_pipe_id: i32,
    next_lock_id: i32,
    next_cvar_id: i32,
}

/// Boot-time configuration (spec §6's boot entry: argument vector, total
/// physical memory size).
pub struct BootConfig<'a> {
    pub frame_count: usize,
    pub kernel_region_pages: usize,
    pub kernel_text_pages: usize,
    /// Pages the kernel break grows by during boot, before VM is enabled
    /// (spec §4.2's pre-VM bootstrap case), reserving heap space for the
    /// kernel's own bookkeeping ahead of the first context switch.
    pub kernel_heap_pages: usize,
    pub user_region_pages: usize,
    pub terminal_count: usize,
    pub init_program: &'a str,
    pub idle_program: &'a str,
}

impl<M: Machine> Kernel<M> {
    /// Run the boot entry contract (spec §6): build the kernel region,
    /// load and install `idle` and `init`, and dispatch into `init`.
    pub fn boot(mut machine: M, cfg: BootConfig<'_>) -> KernelResult<Self> {
        let mut frames = FrameAllocator::new(cfg.frame_count);
        let mut kernel_table =
            KernelPageTable::new(cfg.kernel_region_pages, cfg.kernel_text_pages, &mut frames);
        // Pre-VM bootstrap case (spec §4.2): grow the kernel break by its
        // identity-mapping path before switching on the post-boot discipline.
        kernel_table.set_brk(
            cfg.kernel_text_pages + cfg.kernel_heap_pages,
            &mut frames,
            &mut machine,
        )?;
        kernel_table.enable_vm();

        let mut table = ProcessTable::new();

        let idle_image = machine
            .load_program(cfg.idle_program)
            .map_err(|_| KernelError::Syscall(crate::error::SyscallError::ESRCH))?;
        let idle_pid = machine.alloc_pid();
        let idle_pt = UserPageTable::new(
            cfg.user_region_pages,
            idle_image.text_pages,
            idle_image.data_pages,
            &mut frames,
            &mut machine,
        )?;
        let idle_stack = [frames.alloc()?, frames.alloc()?];
        let mut idle_pcb = Pcb::new(idle_pid, idle_pt, idle_stack, None);
        idle_pcb.user_context.pc = idle_image.entry;
        // The idle PCB is the scheduler's fallback, never a real queue
        // member (spec §4.3: `find_ready_pcb` substitutes it by name).
        table.processes.insert(idle_pid, idle_pcb);

        let init_image = machine
            .load_program(cfg.init_program)
            .map_err(|_| KernelError::Syscall(crate::error::SyscallError::ESRCH))?;
        let init_pid = machine.alloc_pid();
        let init_pt = UserPageTable::new(
            cfg.user_region_pages,
            init_image.text_pages,
            init_image.data_pages,
            &mut frames,
            &mut machine,
        )?;
        let init_stack = [frames.alloc()?, frames.alloc()?];
        let mut init_pcb = Pcb::new(init_pid, init_pt, init_stack, None);
        init_pcb.user_context.pc = init_image.entry;
        table.insert(init_pcb);

        let mut kernel = Self {
            machine,
            frames,
            kernel_table,
            table,
            pipes: HashMap::new(),
            locks: HashMap::new(),
            cvars: HashMap::new(),
            terminals: (0..cfg.terminal_count).map(|_| Terminal::new()).collect(),
            idle_pid,
            init_pid,
            user_region_pages: cfg.user_region_pages,
            ticks: 0,
            next_pipe_id: -1,
            next_lock_id: 0,
            next_cvar_id: 1,
        };

        kernel.table.ready.retain(|&p| p != init_pid);
        switch_to(&mut kernel.table, &mut kernel.kernel_table, &mut kernel.machine, init_pid);
        info!("boot: dispatched into init pid={:?}", init_pid);
        Ok(kernel)
    }

    #[must_use]
    pub fn running(&self) -> ProcessId {
        self.table.running.unwrap_or(self.idle_pid)
    }

    /// Select and dispatch the next process per the round-robin policy,
    /// re-installing its user mapping (spec §4.4's resumption discipline).
    pub fn dispatch_next(&mut self) {
        let next = crate::scheduler::find_ready_pcb(&self.table, self.idle_pid);
        self.table.ready.retain(|&p| p != next);
        switch_to(&mut self.table, &mut self.kernel_table, &mut self.machine, next);
        self.machine.flush_user_tlb();
        #[cfg(feature = "strict-invariants")]
        self.table.check_invariants();
    }

    pub(crate) fn alloc_pipe_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_pipe_id);
        self.next_pipe_id -= 1;
        id
    }

    pub(crate) fn alloc_lock_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_lock_id);
        self.next_lock_id += 2;
        id
    }

    pub(crate) fn alloc_cvar_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_cvar_id);
        self.next_cvar_id += 2;
        id
    }
}
