//! Pipe syscalls (spec §4.6).

use crate::error::{KernelError, PipeError};
use crate::hal::{Machine, ObjectId, ProcessId};
use crate::kernel::{Kernel, PIPE_CAPACITY};
use crate::pcb::{BlockReason, PendingIo};
use crate::pipe::Pipe;
use crate::syscall::Outcome;

use super::SyscallResult;

/// `PipeInit`. Returns the new pipe's id directly in register 0; there is
/// no user pointer to store it through on this machine (see DESIGN.md).
pub fn pipe_init<M: Machine>(kernel: &mut Kernel<M>) -> SyscallResult {
    let id = kernel.alloc_pipe_id();
    kernel.pipes.insert(id, Pipe::new(PIPE_CAPACITY));
    Ok(Outcome::Value(i64::from(id.0)))
}

/// `PipeRead` (spec §4.6). Completes immediately if bytes are already
/// readable; otherwise blocks with reason `PipeRead(id)` until the clock
/// handler observes the pipe non-empty and calls [`pipe_read_wake`].
pub fn pipe_read<M: Machine>(kernel: &mut Kernel<M>, id: ObjectId, len: usize) -> SyscallResult {
    let pid = kernel.running();
    let readable = kernel.pipes.get(&id).ok_or(PipeError::NotFound)?.readable_len();
    if readable == 0 {
        if let Some(pcb) = kernel.table.get_mut(pid) {
            pcb.pending_io = Some(PendingIo { requested_len: len, result: Vec::new() });
        }
        kernel.table.block(pid, BlockReason::PipeRead(id));
        kernel.dispatch_next();
        return Ok(Outcome::Blocked);
    }
    let mut buf = vec![0u8; len];
    let n = kernel.pipes.get_mut(&id).expect("checked above").read(&mut buf, len);
    buf.truncate(n);
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.pending_io = Some(PendingIo { requested_len: len, result: buf });
    }
    Ok(Outcome::Value(n as i64))
}

/// Finish a `PipeRead` that was blocked, once the clock handler has
/// observed the pipe become non-empty. Writes the delivered byte count
/// into the waiter's saved register 0 and moves it back to ready.
pub fn pipe_read_wake<M: Machine>(kernel: &mut Kernel<M>, pid: ProcessId, id: ObjectId) {
    let len = kernel
        .table
        .get(pid)
        .and_then(|p| p.pending_io.as_ref())
        .map(|io| io.requested_len)
        .unwrap_or(0);
    let mut buf = vec![0u8; len];
    let n = kernel.pipes.get_mut(&id).map_or(0, |p| p.read(&mut buf, len));
    buf.truncate(n);
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.pending_io = Some(PendingIo { requested_len: len, result: buf });
        pcb.user_context.set_return(n as i64);
    }
    kernel.table.wake(pid);
}

/// `PipeWrite` (spec §4.6). Never blocks; a write that would fill the
/// ring fails outright.
pub fn pipe_write<M: Machine>(kernel: &mut Kernel<M>, id: ObjectId, data: &[u8]) -> SyscallResult {
    let pipe = kernel.pipes.get_mut(&id).ok_or(KernelError::Pipe(PipeError::NotFound))?;
    let n = pipe.write(data)?;
    Ok(Outcome::Value(n as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyscallError;
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
    fn write_then_read_round_trips() {
        let mut kernel = boot();
        let Outcome::Value(id_raw) = pipe_init(&mut kernel).unwrap() else { panic!() };
        let id = ObjectId(id_raw as i32);
        assert_eq!(pipe_write(&mut kernel, id, b"hello").unwrap(), Outcome::Value(5));
        let outcome = pipe_read(&mut kernel, id, 10).unwrap();
        assert_eq!(outcome, Outcome::Value(5));
        let pid = kernel.running();
        assert_eq!(kernel.table.get(pid).unwrap().pending_io.as_ref().unwrap().result, b"hello");
    }

    #[test]
    fn read_on_empty_pipe_blocks() {
        let mut kernel = boot();
        let Outcome::Value(id_raw) = pipe_init(&mut kernel).unwrap() else { panic!() };
        let id = ObjectId(id_raw as i32);
        let reader = kernel.running();
        assert_eq!(pipe_read(&mut kernel, id, 10).unwrap(), Outcome::Blocked);
        assert_eq!(kernel.table.get(reader).unwrap().block_reason, BlockReason::PipeRead(id));
    }

    #[test]
    fn wake_delivers_bytes_written_after_block() {
        let mut kernel = boot();
        let Outcome::Value(id_raw) = pipe_init(&mut kernel).unwrap() else { panic!() };
        let id = ObjectId(id_raw as i32);
        let reader = kernel.running();
        pipe_read(&mut kernel, id, 10).unwrap();

        pipe_write(&mut kernel, id, b"hi").unwrap();
        pipe_read_wake(&mut kernel, reader, id);

        assert_eq!(kernel.table.get(reader).unwrap().user_context.regs[0], 2);
        assert!(kernel.table.ready.contains(&reader));
    }

    #[test]
    fn full_ring_rejects_write_with_eagain() {
        let mut kernel = boot();
        let Outcome::Value(id_raw) = pipe_init(&mut kernel).unwrap() else { panic!() };
        let id = ObjectId(id_raw as i32);
        let big = vec![0u8; PIPE_CAPACITY];
        let err = pipe_write(&mut kernel, id, &big).unwrap_err();
        assert_eq!(err.as_errno(), SyscallError::EAGAIN.as_errno());
    }
}
