//! Lock, condition-variable, and reclaim syscalls (spec §4.7).

use log::debug;

use crate::error::{KernelError, SyncError};
use crate::hal::{Machine, ObjectId, ObjectKind, ProcessId};
use crate::kernel::Kernel;
use crate::pcb::BlockReason;
use crate::sync::{Cvar, Lock};
use crate::syscall::Outcome;

use super::SyscallResult;

/// `LockInit`.
pub fn lock_init<M: Machine>(kernel: &mut Kernel<M>) -> SyscallResult {
    let id = kernel.alloc_lock_id();
    kernel.locks.insert(id, Lock::new());
    Ok(Outcome::Value(i64::from(id.0)))
}

/// `CvarInit`.
pub fn cvar_init<M: Machine>(kernel: &mut Kernel<M>) -> SyscallResult {
    let id = kernel.alloc_cvar_id();
    kernel.cvars.insert(id, Cvar::new());
    Ok(Outcome::Value(i64::from(id.0)))
}

/// `Acquire` (spec §4.7). Grants the lock immediately if free; otherwise
/// enqueues the caller on the lock's own wait list (not `blocked`) and
/// switches away. [`acquire_wake`] finishes the job when `Release` hands
/// the waiter a turn.
pub fn acquire<M: Machine>(kernel: &mut Kernel<M>, id: ObjectId) -> SyscallResult {
    let pid = kernel.running();
    let lock = kernel.locks.get_mut(&id).ok_or(SyncError::NotFound)?;
    if !lock.held {
        lock.held = true;
        lock.owner = Some(pid);
        if let Some(pcb) = kernel.table.get_mut(pid) {
            pcb.held_lock = Some(id);
        }
        return Ok(Outcome::Value(0));
    }
    lock.waiters.push_front(pid);
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.block_reason = BlockReason::LockWait(id);
    }
    kernel.table.ready.retain(|&p| p != pid);
    kernel.table.blocked.retain(|&p| p != pid);
    kernel.dispatch_next();
    Ok(Outcome::Blocked)
}

/// Re-run the acquire path for a woken lock waiter (spec §4.7: "the woken
/// waiter re-runs the acquire path and competes with any intervening
/// callers"). If the lock is free, grants it and wakes the PCB; if another
/// caller won the race, leaves it parked on the wait list for the next
/// release.
pub fn acquire_wake<M: Machine>(kernel: &mut Kernel<M>, pid: ProcessId, id: ObjectId) {
    let Some(lock) = kernel.locks.get_mut(&id) else { return };
    if lock.held {
        lock.waiters.push_front(pid);
        return;
    }
    lock.held = true;
    lock.owner = Some(pid);
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.held_lock = Some(id);
        pcb.user_context.set_return(0);
        pcb.block_reason = BlockReason::None;
    }
    kernel.table.ready.push_front(pid);
}

/// `Release` (spec §4.7). No hand-off: the tail (oldest) waiter, if any,
/// is simply moved back toward running via [`acquire_wake`] and must
/// compete for the lock again.
pub fn release<M: Machine>(kernel: &mut Kernel<M>, id: ObjectId) -> SyscallResult {
    let pid = kernel.running();
    let lock = kernel.locks.get_mut(&id).ok_or(SyncError::NotFound)?;
    if lock.owner != Some(pid) {
        return Err(KernelError::Sync(SyncError::NotOwner));
    }
    lock.held = false;
    lock.owner = None;
    let waiter = lock.waiters.pop_back();
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.held_lock = None;
    }
    if let Some(waiter) = waiter {
        acquire_wake(kernel, waiter, id);
    }
    debug!("release: lock={id:?} by={pid:?}");
    Ok(Outcome::Value(0))
}

/// `CvarSignal` (spec §4.7): wake the oldest waiter.
pub fn cvar_signal<M: Machine>(kernel: &mut Kernel<M>, id: ObjectId) -> SyscallResult {
    let waiter = kernel.cvars.get_mut(&id).ok_or(SyncError::NotFound)?.waiters.pop_back();
    if let Some(pid) = waiter {
        reacquire_after_cvar_wake(kernel, pid);
    }
    Ok(Outcome::Value(0))
}

/// `CvarBroadcast`: wake every waiter, in insertion (FIFO) order.
pub fn cvar_broadcast<M: Machine>(kernel: &mut Kernel<M>, id: ObjectId) -> SyscallResult {
    let cvar = kernel.cvars.get_mut(&id).ok_or(SyncError::NotFound)?;
    let waiters: Vec<ProcessId> = cvar.waiters.drain(..).rev().collect();
    for pid in waiters {
        reacquire_after_cvar_wake(kernel, pid);
    }
    Ok(Outcome::Value(0))
}

/// `CvarWait(cvar, lock)` (spec §4.7). Verifies ownership, releases the
/// lock without hand-off, and parks on the cvar's wait list.
pub fn cvar_wait<M: Machine>(kernel: &mut Kernel<M>, cvar: ObjectId, lock: ObjectId) -> SyscallResult {
    let pid = kernel.running();
    {
        let lock_obj = kernel.locks.get(&lock).ok_or(SyncError::NotFound)?;
        if lock_obj.owner != Some(pid) {
            return Err(KernelError::Sync(SyncError::NotOwner));
        }
    }
    if let Some(l) = kernel.locks.get_mut(&lock) {
        l.held = false;
        l.owner = None;
    }
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.held_lock = None;
    }
    kernel.cvars.get_mut(&cvar).ok_or(SyncError::NotFound)?.waiters.push_front(pid);
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.block_reason = BlockReason::CvarWait(cvar);
        pcb.cvar_wait_lock = Some(lock);
    }
    kernel.table.ready.retain(|&p| p != pid);
    kernel.table.blocked.retain(|&p| p != pid);
    kernel.dispatch_next();
    Ok(Outcome::Blocked)
}

/// Woken from a cvar: re-run the acquire path for the lock it held before
/// `CvarWait` (spec §4.7's "on resumption, reacquire the lock via the
/// shared acquire helper"). If the lock is still held by someone else the
/// PCB stays parked, now on the lock's own wait list, until a matching
/// `Release` calls [`acquire_wake`] for it.
fn reacquire_after_cvar_wake<M: Machine>(kernel: &mut Kernel<M>, pid: ProcessId) {
    let Some(lock_id) = kernel.table.get(pid).and_then(|p| p.cvar_wait_lock) else {
        kernel.table.wake(pid);
        return;
    };
    acquire_wake(kernel, pid, lock_id);
}

/// `Reclaim(id)` (spec §4.7). Dispatches on the id's encoded kind.
pub fn reclaim<M: Machine>(kernel: &mut Kernel<M>, id: ObjectId) -> SyscallResult {
    match id.kind() {
        ObjectKind::Pipe => reclaim_pipe(kernel, id),
        ObjectKind::Lock => reclaim_lock(kernel, id),
        ObjectKind::Cvar => reclaim_cvar(kernel, id),
    }
}

fn reclaim_pipe<M: Machine>(kernel: &mut Kernel<M>, id: ObjectId) -> SyscallResult {
    let any_reader_blocked = kernel
        .table
        .processes
        .values()
        .any(|p| p.block_reason == BlockReason::PipeRead(id));
    if any_reader_blocked {
        return Err(KernelError::Pipe(crate::error::PipeError::ReaderBlocked));
    }
    kernel.pipes.remove(&id).ok_or(crate::error::PipeError::NotFound)?;
    Ok(Outcome::Value(0))
}

fn reclaim_lock<M: Machine>(kernel: &mut Kernel<M>, id: ObjectId) -> SyscallResult {
    let pid = kernel.running();
    let lock = kernel.locks.get(&id).ok_or(SyncError::NotFound)?;
    if lock.owner != Some(pid) {
        return Err(KernelError::Sync(SyncError::NotOwner));
    }
    if !lock.waiters.is_empty() {
        return Err(KernelError::Sync(SyncError::WaitersPresent));
    }
    kernel.locks.remove(&id);
    if let Some(pcb) = kernel.table.get_mut(pid) {
        pcb.held_lock = None;
    }
    Ok(Outcome::Value(0))
}

fn reclaim_cvar<M: Machine>(kernel: &mut Kernel<M>, id: ObjectId) -> SyscallResult {
    let cvar = kernel.cvars.get(&id).ok_or(SyncError::NotFound)?;
    if !cvar.waiters.is_empty() {
        return Err(KernelError::Sync(SyncError::WaitersPresent));
    }
    kernel.cvars.remove(&id);
    Ok(Outcome::Value(0))
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
    fn acquire_on_free_lock_succeeds_immediately() {
        let mut kernel = boot();
        let Outcome::Value(id_raw) = lock_init(&mut kernel).unwrap() else { panic!() };
        let id = ObjectId(id_raw as i32);
        assert_eq!(acquire(&mut kernel, id).unwrap(), Outcome::Value(0));
        assert!(kernel.locks.get(&id).unwrap().held);
    }

    #[test]
    fn release_by_non_owner_is_eperm() {
        let mut kernel = boot();
        let Outcome::Value(id_raw) = lock_init(&mut kernel).unwrap() else { panic!() };
        let id = ObjectId(id_raw as i32);
        let err = release(&mut kernel, id).unwrap_err();
        assert_eq!(err, KernelError::Sync(SyncError::NotOwner));
    }

    #[test]
    fn release_wakes_tail_waiter_who_must_recontend() {
        let mut kernel = boot();
        let Outcome::Value(id_raw) = lock_init(&mut kernel).unwrap() else { panic!() };
        let id = ObjectId(id_raw as i32);
        acquire(&mut kernel, id).unwrap();
        let owner = kernel.running();

        // Simulate a second process contending.
        kernel.locks.get_mut(&id).unwrap().waiters.push_front(ProcessId(999));

        kernel.table.running = Some(owner);
        release(&mut kernel, id).unwrap();
        assert!(kernel.locks.get(&id).unwrap().held);
        assert_eq!(kernel.locks.get(&id).unwrap().owner, Some(ProcessId(999)));
    }

    #[test]
    fn reclaim_lock_with_waiters_is_busy() {
        let mut kernel = boot();
        let Outcome::Value(id_raw) = lock_init(&mut kernel).unwrap() else { panic!() };
        let id = ObjectId(id_raw as i32);
        acquire(&mut kernel, id).unwrap();
        kernel.locks.get_mut(&id).unwrap().waiters.push_front(ProcessId(999));
        let err = reclaim(&mut kernel, id).unwrap_err();
        assert_eq!(err, KernelError::Sync(SyncError::WaitersPresent));
    }

    #[test]
    fn object_kind_dispatch_picks_right_reclaim_path() {
        let mut kernel = boot();
        let Outcome::Value(lock_id) = lock_init(&mut kernel).unwrap() else { panic!() };
        let Outcome::Value(cvar_id) = cvar_init(&mut kernel).unwrap() else { panic!() };
        assert_eq!(ObjectId(lock_id as i32).kind(), ObjectKind::Lock);
        assert_eq!(ObjectId(cvar_id as i32).kind(), ObjectKind::Cvar);
        assert_eq!(reclaim(&mut kernel, ObjectId(cvar_id as i32)).unwrap(), Outcome::Value(0));
    }
}
