//! Terminal I/O syscalls (spec §4.8, §4.11).

use crate::error::TtyError;
use crate::hal::{Machine, ProcessId, TerminalId};
use crate::kernel::Kernel;
use crate::pcb::{BlockReason, PendingIo};
use crate::syscall::Outcome;

use super::SyscallResult;

fn terminal_mut<'a, M: Machine>(
    kernel: &'a mut Kernel<M>,
    tty: TerminalId,
) -> Result<&'a mut crate::tty::Terminal, TtyError> {
    kernel.terminals.get_mut(tty.0 as usize).ok_or(TtyError::NoSuchTerminal)
}

/// `TtyRead` (spec §4.8). Blocks with reason `TerminalRead` if the line
/// buffer is empty; [`tty_read_wake`] finishes it once a line arrives.
pub fn tty_read<M: Machine>(kernel: &mut Kernel<M>, tty: TerminalId, len: usize) -> SyscallResult {
    let pid = kernel.running();
    if terminal_mut(kernel, tty)?.is_empty() {
        if let Some(pcb) = kernel.table.get_mut(pid) {
            pcb.pending_io = Some(PendingIo { requested_len: len, result: Vec::new() });
        }
        kernel.table.block(pid, BlockReason::TerminalRead(tty));
        kernel.dispatch_next();
        return Ok(Outcome::Blocked);
    }
    let mut buf = vec![0u8; len];
    let n = terminal_mut(kernel, tty)?.read(&mut buf, len);
    buf.truncate(n);
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.pending_io = Some(PendingIo { requested_len: len, result: buf });
    }
    Ok(Outcome::Value(n as i64))
}

/// Finish a blocked `TtyRead` once the receive trap has delivered a line.
pub fn tty_read_wake<M: Machine>(kernel: &mut Kernel<M>, pid: ProcessId, tty: TerminalId) {
    let len = kernel
        .table
        .get(pid)
        .and_then(|p| p.pending_io.as_ref())
        .map(|io| io.requested_len)
        .unwrap_or(0);
    let mut buf = vec![0u8; len];
    let n = kernel.terminals.get_mut(tty.0 as usize).map_or(0, |t| t.read(&mut buf, len));
    buf.truncate(n);
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.pending_io = Some(PendingIo { requested_len: len, result: buf });
        pcb.user_context.set_return(n as i64);
    }
    kernel.table.wake(pid);
}

/// `TtyWrite` (spec §4.8). Starts the first hardware-max-sized chunk and
/// blocks `terminal_write_pending`/`terminal_write_in_flight`; the
/// transmit-complete trap drives the remaining chunks via
/// [`tty_write_continue`]. Returns `Blocked` immediately if any bytes
/// remain to send (spec: "return total bytes requested" once complete,
/// which for this cooperative model means on the final wake, not here).
pub fn tty_write<M: Machine>(kernel: &mut Kernel<M>, tty: TerminalId, data: Vec<u8>) -> SyscallResult {
    let pid = kernel.running();
    terminal_mut(kernel, tty)?;
    if data.is_empty() {
        return Ok(Outcome::Value(0));
    }
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.pending_io = Some(PendingIo { requested_len: data.len(), result: data });
    }
    begin_write_or_wait(kernel, pid, tty);
    Ok(Outcome::Blocked)
}

fn begin_write_or_wait<M: Machine>(kernel: &mut Kernel<M>, pid: ProcessId, tty: TerminalId) {
    let busy = kernel.terminals.get(tty.0 as usize).is_some_and(|t| t.busy);
    if busy {
        kernel.table.block(pid, BlockReason::TerminalWritePending(tty));
        kernel.dispatch_next();
        return;
    }
    let max = kernel.machine.tty_max_line();
    let chunk: Vec<u8> = kernel
        .table
        .get(pid)
        .and_then(|p| p.pending_io.as_ref())
        .map(|io| io.result.iter().take(max).copied().collect())
        .unwrap_or_default();
    if let Some(t) = kernel.terminals.get_mut(tty.0 as usize) {
        t.busy = true;
    }
    kernel.machine.tty_transmit(tty, &chunk);
    if let Some(pcb) = kernel.table.get_mut(pid) {
        if let Some(io) = &mut pcb.pending_io {
            io.result.drain(0..chunk.len());
        }
    }
    kernel.table.block(pid, BlockReason::TerminalWriteInFlight(tty));
    kernel.dispatch_next();
}

/// Called from the transmit-complete trap for a PCB parked
/// `terminal_write_in_flight`: advance to the next chunk, or finish and
/// wake with the total byte count once the staged buffer is empty.
pub fn tty_write_continue<M: Machine>(kernel: &mut Kernel<M>, pid: ProcessId, tty: TerminalId) {
    let remaining = kernel.table.get(pid).and_then(|p| p.pending_io.as_ref()).map(|io| io.result.len());
    match remaining {
        Some(0) | None => {
            if let Some(pcb) = kernel.table.get_mut(pid) {
                let total = pcb.pending_io.take().map_or(0, |io| io.requested_len as i64);
                pcb.user_context.set_return(total);
            }
            kernel.table.wake(pid);
        }
        Some(_) => {
            // Let begin_write_or_wait issue the next chunk; the caller
            // (transmit trap) has already cleared busy for this terminal.
            kernel.table.blocked.retain(|&p| p != pid);
            begin_write_or_wait(kernel, pid, tty);
        }
    }
}

/// Called from the transmit-complete trap when another PCB is queued
/// `terminal_write_pending` on a terminal that just freed up: hands it
/// the terminal and issues its first chunk (spec §4.11).
pub fn tty_write_wake_pending<M: Machine>(kernel: &mut Kernel<M>, pid: ProcessId, tty: TerminalId) {
    kernel.table.blocked.retain(|&p| p != pid);
    begin_write_or_wait(kernel, pid, tty);
}
