//! Process lifecycle syscalls (spec §4.5).

use log::{debug, warn};

use crate::context::clone_into;
use crate::error::{KernelError, KernelResult, SyscallError};
use crate::hal::{Machine, ProcessId};
use crate::kernel::Kernel;
use crate::mm::user_table::UserPageTable;
use crate::mm::pages_for;
use crate::pcb::{BlockReason, Pcb};
use crate::syscall::Outcome;

use super::SyscallResult;

/// `Fork` (spec §4.5.1). Allocates the child's page table and kernel
/// stack, registers it as ready and as the parent's child, and returns the
/// child's PID to the parent immediately; the child's own `regs[0]` is
/// overwritten to 0 so it observes the standard fork contract once it is
/// itself dispatched.
pub fn fork<M: Machine>(kernel: &mut Kernel<M>) -> SyscallResult {
    let parent_pid = kernel.running();
    let child_pt = {
        let parent = kernel.table.get(parent_pid).ok_or(KernelError::Syscall(SyscallError::ESRCH))?;
        UserPageTable::new_for_fork(&parent.page_table, &mut kernel.frames, &mut kernel.machine)?
    };
    let child_stack = [kernel.frames.alloc()?, kernel.frames.alloc()?];
    let child_pid = kernel.machine.alloc_pid();
    let child_pcb = Pcb::new(child_pid, child_pt, child_stack, Some(parent_pid));
    kernel.table.insert(child_pcb);

    if let Some(parent) = kernel.table.get_mut(parent_pid) {
        parent.children.push(child_pid);
    }

    clone_into(
        &mut kernel.table,
        &mut kernel.kernel_table,
        &mut kernel.frames,
        &mut kernel.machine,
        parent_pid,
        child_pid,
    );
    if let Some(child) = kernel.table.get_mut(child_pid) {
        child.user_context.set_return(0);
    }

    debug!("fork: pid={:?} -> child={:?}", parent_pid, child_pid);
    Ok(Outcome::Value(i64::from(child_pid.0)))
}

/// `Exec` (spec §4.5.2). Tears down the caller's address space and
/// rebuilds it from the newly loaded image. A failed load still leaves
/// the caller's old address space gone; only the error code differs.
pub fn exec<M: Machine>(kernel: &mut Kernel<M>, path: &str) -> SyscallResult {
    let pid = kernel.running();
    let image = match kernel.machine.load_program(path) {
        Ok(img) => img,
        Err(_) => return Ok(Outcome::Value(SyscallError::ESRCH.as_errno())),
    };
    let region_pages = kernel.table.get(pid).map(|p| p.page_table.region_pages()).unwrap_or(0);

    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.page_table.unmap_all(&mut kernel.frames);
    }
    let new_pt = UserPageTable::new(
        region_pages,
        image.text_pages,
        image.data_pages,
        &mut kernel.frames,
        &mut kernel.machine,
    )?;
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.page_table = new_pt;
        pcb.user_context = crate::hal::UserContext { pc: image.entry, ..Default::default() };
    }
    debug!("exec: pid={:?} path={path}", pid);
    Ok(Outcome::Value(0))
}

/// `Exit` (spec §4.5.3). Exiting `init` halts the machine. Otherwise
/// retires the PID, frees every resource, reparents children to nobody,
/// hands the PCB to its parent's defunct queue (or frees it outright if
/// orphaned), and dispatches the next ready process.
pub fn exit<M: Machine>(kernel: &mut Kernel<M>, status: i64) {
    let pid = kernel.running();
    if pid == kernel.init_pid {
        kernel.machine.abort("init exited");
    }

    kernel.machine.retire_pid(pid);
    let (parent, children, stack_frames) = if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.page_table.unmap_all(&mut kernel.frames);
        pcb.exit_status = Some(status);
        (pcb.parent, std::mem::take(&mut pcb.children), pcb.kernel_stack_frames)
    } else {
        warn!("exit: unknown running pid {pid:?}");
        return;
    };
    for frame in stack_frames {
        kernel.frames.free(frame);
    }
    for child in children {
        if let Some(c) = kernel.table.get_mut(child) {
            c.parent = None;
        }
    }

    kernel.table.retire(pid);
    if parent.is_none() {
        kernel.table.reap(pid);
    } else {
        wake_waiting_parent(kernel, pid);
    }

    debug!("exit: pid={:?} status={status}", pid);
    kernel.dispatch_next();
}

/// If `child`'s parent is blocked in `Wait`, finish that wait now instead
/// of waiting for the next clock tick; fires immediately at the moment
/// the child becomes defunct, matching spec §4.9's wait-wake rule early.
fn wake_waiting_parent<M: Machine>(kernel: &mut Kernel<M>, child: ProcessId) {
    let Some(parent_pid) = kernel.table.get(child).and_then(|c| c.parent) else { return };
    let is_waiting =
        matches!(kernel.table.get(parent_pid).map(|p| p.block_reason), Some(BlockReason::Wait));
    if is_waiting {
        finish_wait(kernel, parent_pid);
    }
}

/// Reap the first defunct child of `parent`, if any, writing the result
/// into `parent`'s saved `UserContext` and moving it back to ready.
pub fn finish_wait<M: Machine>(kernel: &mut Kernel<M>, parent: ProcessId) {
    if let Some((child_pid, status)) = reap_defunct_child(kernel, parent) {
        if let Some(pcb) = kernel.table.get_mut(parent) {
            pcb.user_context.regs[0] = i64::from(child_pid.0);
            pcb.user_context.regs[1] = status;
        }
        kernel.table.wake(parent);
    }
}

fn reap_defunct_child<M: Machine>(kernel: &mut Kernel<M>, parent: ProcessId) -> Option<(ProcessId, i64)> {
    let child_pid = kernel
        .table
        .defunct
        .iter()
        .rev()
        .copied()
        .find(|&pid| kernel.table.get(pid).and_then(|p| p.parent) == Some(parent))?;
    let pcb = kernel.table.reap(child_pid)?;
    if let Some(parent_pcb) = kernel.table.get_mut(parent) {
        parent_pcb.children.retain(|&c| c != child_pid);
    }
    Some((child_pid, pcb.exit_status.unwrap_or(-1)))
}

/// `Wait` (spec §4.5.4). Returns `(pid, status)` immediately if a defunct
/// child is already waiting to be reaped; otherwise blocks.
pub fn wait<M: Machine>(kernel: &mut Kernel<M>) -> SyscallResult {
    let pid = kernel.running();
    let has_children = kernel.table.get(pid).is_some_and(|p| !p.children.is_empty());
    if !has_children {
        return Err(KernelError::Syscall(SyscallError::ECHILD));
    }
    if let Some((child_pid, status)) = reap_defunct_child(kernel, pid) {
        return Ok(Outcome::ValuePair(i64::from(child_pid.0), status));
    }
    kernel.table.block(pid, BlockReason::Wait);
    kernel.dispatch_next();
    Ok(Outcome::Blocked)
}

/// `Delay` (spec §4.5.5).
pub fn delay<M: Machine>(kernel: &mut Kernel<M>, ticks: i64) -> SyscallResult {
    if ticks < 0 {
        return Err(KernelError::Syscall(SyscallError::EINVAL));
    }
    if ticks == 0 {
        return Ok(Outcome::Value(0));
    }
    let pid = kernel.running();
    kernel.table.block(pid, BlockReason::Delay(ticks as u64));
    kernel.dispatch_next();
    Ok(Outcome::Blocked)
}

/// `Brk` (spec §4.5.6). `addr` is a byte address; it is rounded up to a
/// page index before validation, so a request that ends mid-page still
/// gets that whole page mapped.
pub fn brk<M: Machine>(kernel: &mut Kernel<M>, addr: u64) -> SyscallResult {
    let pid = kernel.running();
    let new_page = pages_for(addr as usize);
    let pcb = kernel.table.get_mut(pid).ok_or(KernelError::Syscall(SyscallError::ESRCH))?;
    pcb.page_table.set_brk(new_page, &mut kernel.frames, &mut kernel.machine)?;
    Ok(Outcome::Value(0))
}

/// `GetPid` (spec §4.5.7).
pub fn getpid<M: Machine>(kernel: &mut Kernel<M>) -> SyscallResult {
    Ok(Outcome::Value(i64::from(kernel.running().0)))
}

/// Byte-size convenience used by `Brk` callers translating a requested
/// heap size into the page-rounded address `brk()` expects.
#[must_use]
pub fn brk_target_addr(current_pages: usize, grow_by_bytes: usize) -> u64 {
    ((current_pages + pages_for(grow_by_bytes)) * crate::hal::PAGE_SIZE) as u64
}
