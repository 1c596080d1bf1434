//! Trap vector: syscall dispatch, the clock handler, the memory trap, and
//! the two TTY traps (spec §4.5, §4.9, §4.10, §4.11).

use log::{trace, warn};

use crate::error::KernelError;
use crate::hal::{Machine, ObjectId, ProcessId, TerminalId, UserContext};
use crate::kernel::Kernel;
use crate::mm::page_of;
use crate::pcb::BlockReason;
use crate::syscall::{pipe as sys_pipe, process as sys_process, sync as sys_sync, tty as sys_tty, Outcome};

/// A fully-decoded syscall request. Spec §6 describes the wire ABI as
/// fixed-width registers; because the simulated machine in this crate has
/// no addressable user memory for the host to copy variable-length
/// arguments out of, the trap vector accepts requests pre-decoded instead
/// of raw register contents (see DESIGN.md).
#[derive(Debug, Clone)]
pub enum SyscallRequest {
    Fork,
    Exec { path: String },
    Exit { status: i64 },
    Wait,
    GetPid,
    Brk { addr: u64 },
    Delay { ticks: i64 },
    TtyRead { tty: TerminalId, len: usize },
    TtyWrite { tty: TerminalId, data: Vec<u8> },
    PipeInit,
    PipeRead { id: ObjectId, len: usize },
    PipeWrite { id: ObjectId, data: Vec<u8> },
    LockInit,
    Acquire { id: ObjectId },
    Release { id: ObjectId },
    CvarInit,
    CvarSignal { id: ObjectId },
    CvarBroadcast { id: ObjectId },
    CvarWait { cvar: ObjectId, lock: ObjectId },
    Reclaim { id: ObjectId },
}

/// `trap_kernel` (spec §4.5): copy the incoming `UserContext` into the
/// running PCB, dispatch, and copy the (possibly different) running PCB's
/// context back out.
pub fn trap_kernel<M: Machine>(
    kernel: &mut Kernel<M>,
    incoming: UserContext,
    request: SyscallRequest,
) -> UserContext {
    let caller = kernel.running();
    if let Some(pcb) = kernel.table.get_mut(caller) {
        pcb.user_context = incoming;
    }

    let result = dispatch(kernel, request);

    match result {
        Ok(Outcome::Value(v)) => {
            if let Some(pcb) = kernel.table.get_mut(caller) {
                pcb.user_context.set_return(v);
            }
        }
        Ok(Outcome::ValuePair(a, b)) => {
            if let Some(pcb) = kernel.table.get_mut(caller) {
                pcb.user_context.regs[0] = a;
                pcb.user_context.regs[1] = b;
            }
        }
        Ok(Outcome::Blocked) => {}
        Err(e) => {
            if let Some(pcb) = kernel.table.get_mut(caller) {
                pcb.user_context.set_return(e.as_errno());
            }
        }
    }

    kernel.table.get(kernel.running()).map(|p| p.user_context).unwrap_or_default()
}

fn dispatch<M: Machine>(kernel: &mut Kernel<M>, request: SyscallRequest) -> Result<Outcome, KernelError> {
    match request {
        SyscallRequest::Fork => sys_process::fork(kernel),
        SyscallRequest::Exec { path } => sys_process::exec(kernel, &path),
        SyscallRequest::Exit { status } => {
            sys_process::exit(kernel, status);
            Ok(Outcome::Blocked)
        }
        SyscallRequest::Wait => sys_process::wait(kernel),
        SyscallRequest::GetPid => sys_process::getpid(kernel),
        SyscallRequest::Brk { addr } => sys_process::brk(kernel, addr),
        SyscallRequest::Delay { ticks } => sys_process::delay(kernel, ticks),
        SyscallRequest::TtyRead { tty, len } => sys_tty::tty_read(kernel, tty, len),
        SyscallRequest::TtyWrite { tty, data } => sys_tty::tty_write(kernel, tty, data),
        SyscallRequest::PipeInit => sys_pipe::pipe_init(kernel),
        SyscallRequest::PipeRead { id, len } => sys_pipe::pipe_read(kernel, id, len),
        SyscallRequest::PipeWrite { id, data } => sys_pipe::pipe_write(kernel, id, &data),
        SyscallRequest::LockInit => sys_sync::lock_init(kernel),
        SyscallRequest::Acquire { id } => sys_sync::acquire(kernel, id),
        SyscallRequest::Release { id } => sys_sync::release(kernel, id),
        SyscallRequest::CvarInit => sys_sync::cvar_init(kernel),
        SyscallRequest::CvarSignal { id } => sys_sync::cvar_signal(kernel, id),
        SyscallRequest::CvarBroadcast { id } => sys_sync::cvar_broadcast(kernel, id),
        SyscallRequest::CvarWait { cvar, lock } => sys_sync::cvar_wait(kernel, cvar, lock),
        SyscallRequest::Reclaim { id } => sys_sync::reclaim(kernel, id),
    }
}

/// Status recorded for a PCB killed by a fatal fault (spec §7).
pub const FAULT_STATUS: i64 = -1;

fn kill_process<M: Machine>(kernel: &mut Kernel<M>, pid: ProcessId) {
    warn!("killing pid={pid:?} on fatal fault");
    kernel.table.running = Some(pid);
    sys_process::exit(kernel, FAULT_STATUS);
}

/// The clock trap (spec §4.9): service delay/wait/pipe_read wakeups, then
/// preempt the running process into round-robin rotation.
pub fn clock_handler<M: Machine>(kernel: &mut Kernel<M>) {
    kernel.ticks += 1;
    let snapshot: Vec<ProcessId> = kernel.table.blocked.iter().copied().collect();
    for pid in snapshot {
        let Some(reason) = kernel.table.get(pid).map(|p| p.block_reason) else { continue };
        match reason {
            BlockReason::Delay(ticks) => {
                if ticks <= 1 {
                    if let Some(pcb) = kernel.table.get_mut(pid) {
                        pcb.user_context.set_return(0);
                    }
                    kernel.table.wake(pid);
                } else if let Some(pcb) = kernel.table.get_mut(pid) {
                    pcb.block_reason = BlockReason::Delay(ticks - 1);
                }
            }
            BlockReason::Wait => {
                let has_defunct_child = kernel
                    .table
                    .defunct
                    .iter()
                    .any(|&d| kernel.table.get(d).and_then(|c| c.parent) == Some(pid));
                if has_defunct_child {
                    sys_process::finish_wait(kernel, pid);
                }
            }
            BlockReason::PipeRead(id) => {
                let has_data = kernel.pipes.get(&id).is_some_and(|p| p.readable_len() > 0);
                if has_data {
                    sys_pipe::pipe_read_wake(kernel, pid, id);
                }
            }
            _ => {}
        }
    }

    let current = kernel.running();
    if current != kernel.idle_pid {
        kernel.table.running = None;
        kernel.table.ready.push_front(current);
    }
    kernel.dispatch_next();
    trace!("clock tick={} running={:?}", kernel.ticks, kernel.running());
}

/// The memory trap (spec §4.10): grow the stack on a near-boundary fault,
/// kill the process otherwise.
pub fn memory_trap<M: Machine>(kernel: &mut Kernel<M>, fault_addr: u64) {
    let pid = kernel.running();
    let Some(region_pages) = kernel.table.get(pid).map(|p| p.page_table.region_pages()) else {
        return;
    };
    let page = page_of(fault_addr);
    if page >= region_pages {
        kill_process(kernel, pid);
        return;
    }
    let (stack_low, brk_page) = {
        let pt = &kernel.table.get(pid).expect("checked above").page_table;
        (pt.stack_low_page(), pt.brk_page())
    };
    let within_growth_window = page + 2 >= stack_low && page > brk_page;
    if !within_growth_window {
        kill_process(kernel, pid);
        return;
    }
    let pcb = kernel.table.get_mut(pid).expect("checked above");
    let grown = pcb.page_table.grow_stack_to(page, &mut kernel.frames, &mut kernel.machine);
    if grown.is_err() {
        kill_process(kernel, pid);
    }
}

/// TTY receive trap (spec §4.11): append the delivered line, wake the
/// single blocked reader on this terminal, if any.
pub fn tty_receive_trap<M: Machine>(kernel: &mut Kernel<M>, tty: TerminalId, line: &[u8]) {
    if let Some(t) = kernel.terminals.get_mut(tty.0 as usize) {
        t.push_line(line);
    }
    let waiter = kernel
        .table
        .blocked
        .iter()
        .copied()
        .find(|&pid| kernel.table.get(pid).map(|p| p.block_reason) == Some(BlockReason::TerminalRead(tty)));
    if let Some(pid) = waiter {
        sys_tty::tty_read_wake(kernel, pid, tty);
    }
}

/// TTY transmit trap (spec §4.11): clear busy, wake the in-flight writer
/// (continuing its remaining chunks or finishing it), then, if the
/// terminal is free again, hand it to the next pending writer.
pub fn tty_transmit_trap<M: Machine>(kernel: &mut Kernel<M>, tty: TerminalId) {
    if let Some(t) = kernel.terminals.get_mut(tty.0 as usize) {
        t.busy = false;
    }
    let in_flight = kernel.table.blocked.iter().copied().find(|&pid| {
        kernel.table.get(pid).map(|p| p.block_reason) == Some(BlockReason::TerminalWriteInFlight(tty))
    });
    if let Some(pid) = in_flight {
        sys_tty::tty_write_continue(kernel, pid, tty);
    }

    let still_free = kernel.terminals.get(tty.0 as usize).is_some_and(|t| !t.busy);
    if still_free {
        let pending = kernel.table.blocked.iter().copied().find(|&pid| {
            kernel.table.get(pid).map(|p| p.block_reason) == Some(BlockReason::TerminalWritePending(tty))
        });
        if let Some(pid) = pending {
            sys_tty::tty_write_wake_pending(kernel, pid, tty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimMachine;
    use crate::kernel::BootConfig;

    fn boot() -> Kernel<SimMachine> {
        let machine = SimMachine::with_default_programs(256);
        Kernel::boot(
            machine,
            BootConfig {
                frame_count: 256,
                kernel_region_pages: 32,
                kernel_text_pages: 2,
                kernel_heap_pages: 2,
                user_region_pages: 32,
                terminal_count: 1,
                init_program: "test/init",
                idle_program: "idle",
            },
        )
        .unwrap()
    }

    #[test]
    fn delay_fairness_wakes_after_exact_tick_count() {
        let mut kernel = boot();
        let ctx = UserContext::default();
        trap_kernel(&mut kernel, ctx, SyscallRequest::Delay { ticks: 3 });
        let pid = kernel.init_pid;
        assert_eq!(kernel.table.get(pid).unwrap().block_reason, BlockReason::Delay(3));

        clock_handler(&mut kernel);
        clock_handler(&mut kernel);
        assert!(kernel.table.blocked.contains(&pid));
        clock_handler(&mut kernel);
        assert!(!kernel.table.blocked.contains(&pid));
        assert_eq!(kernel.table.get(pid).unwrap().user_context.regs[0], 0);
    }

    #[test]
    fn memory_trap_kills_process_far_below_stack() {
        let mut kernel = boot();
        let Outcome::Value(child_raw) = sys_process::fork(&mut kernel).unwrap() else { panic!() };
        let pid = ProcessId(child_raw as u32);
        kernel.table.running = Some(pid);
        let far_below =
            (kernel.table.get(pid).unwrap().page_table.stack_low_page() - 5) * crate::hal::PAGE_SIZE;
        memory_trap(&mut kernel, far_below as u64);
        assert!(kernel.table.defunct.contains(&pid));
    }

    #[test]
    fn memory_trap_grows_stack_one_page_below() {
        let mut kernel = boot();
        let Outcome::Value(child_raw) = sys_process::fork(&mut kernel).unwrap() else { panic!() };
        let pid = ProcessId(child_raw as u32);
        kernel.table.running = Some(pid);
        let stack_low = kernel.table.get(pid).unwrap().page_table.stack_low_page();
        let target_page = stack_low - 1;
        let addr = (target_page * crate::hal::PAGE_SIZE) as u64;
        memory_trap(&mut kernel, addr);
        assert!(kernel.table.get(pid).unwrap().page_table.is_mapped(target_page));
    }

    #[test]
    fn transmit_trap_hands_terminal_to_pending_writer() {
        let mut kernel = boot();
        let writer_a = kernel.running();
        let Outcome::Value(child_raw) = sys_process::fork(&mut kernel).unwrap() else { panic!() };
        let writer_b = ProcessId(child_raw as u32);

        kernel.table.running = Some(writer_a);
        sys_tty::tty_write(&mut kernel, TerminalId(0), b"hello".to_vec()).unwrap();

        kernel.table.running = Some(writer_b);
        sys_tty::tty_write(&mut kernel, TerminalId(0), b"world".to_vec()).unwrap();
        assert_eq!(
            kernel.table.get(writer_b).unwrap().block_reason,
            BlockReason::TerminalWritePending(TerminalId(0))
        );

        tty_transmit_trap(&mut kernel, TerminalId(0));
        assert_eq!(
            kernel.table.get(writer_b).unwrap().block_reason,
            BlockReason::TerminalWriteInFlight(TerminalId(0))
        );
    }
}
