//! Kernel error taxonomy.
//!
//! One enum per subsystem, each with a hand-written `Display` impl and a
//! `From` conversion into [`KernelError`]: callers match on the specific
//! error where they can do something about it, and propagate the unified
//! error where they can't.

use core::fmt;

/// Kernel-wide result alias.
pub type KernelResult<T> = Result<T, KernelError>;

/// Linux-style negative-errno codes a syscall implementation writes back to
/// register 0 (spec §6, §7). Kept as a thin newtype so call sites read
/// `SyscallError::EAGAIN.as_errno()` instead of a bare magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// No child processes (`Wait` with none remaining).
    ECHILD,
    /// Invalid argument (negative delay, brk into text/stack, bad id kind).
    EINVAL,
    /// Resource temporarily unavailable (would block in a context that
    /// cannot block, or an operation that must not block right now).
    EAGAIN,
    /// Out of memory (frame allocator exhausted).
    ENOMEM,
    /// No such process (id doesn't name a live PCB).
    ESRCH,
    /// Broken pipe / write to a pipe with no readers left.
    EPIPE,
    /// Device or resource busy (reclaim of an in-use object).
    EBUSY,
    /// Operation not permitted (release of a lock the caller doesn't hold).
    EPERM,
    /// Bad address (pointer validation failure).
    EFAULT,
}

impl SyscallError {
    /// The negative value written into the caller's `UserContext` register 0.
    #[must_use]
    pub const fn as_errno(self) -> i64 {
        match self {
            Self::EPERM => -1,
            Self::ESRCH => -3,
            Self::EAGAIN => -11,
            Self::ENOMEM => -12,
            Self::EFAULT => -14,
            Self::EBUSY => -16,
            Self::EINVAL => -22,
            Self::EPIPE => -32,
            Self::ECHILD => -10,
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ECHILD => "no child processes",
            Self::EINVAL => "invalid argument",
            Self::EAGAIN => "resource temporarily unavailable",
            Self::ENOMEM => "out of memory",
            Self::ESRCH => "no such process",
            Self::EPIPE => "broken pipe",
            Self::EBUSY => "resource busy",
            Self::EPERM => "operation not permitted",
            Self::EFAULT => "bad address",
        };
        f.write_str(s)
    }
}

/// Frame-allocator failures (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// No clear bit left in the bitmap.
    NoMemory,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMemory => f.write_str("no free physical frames"),
        }
    }
}

/// Kernel/user page-table maintenance failures (spec §4.2, §4.5.6, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// Propagated frame exhaustion.
    OutOfFrames,
    /// Shrinking the kernel break below its boot-time value.
    BelowBootBreak,
    /// Growing the kernel break into (or within one page of) the kernel stack.
    IntoKernelStack,
    /// `brk` at or below the last user-data page, or at/above the stack.
    InvalidBreak,
    /// A virtual page outside the addressable region for this table.
    OutOfRange,
}

impl fmt::Display for PagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OutOfFrames => "out of physical frames",
            Self::BelowBootBreak => "cannot shrink below the boot-time break",
            Self::IntoKernelStack => "growth would collide with the kernel stack",
            Self::InvalidBreak => "requested break overlaps text or the stack",
            Self::OutOfRange => "virtual page outside region",
        };
        f.write_str(s)
    }
}

impl From<FrameError> for PagingError {
    fn from(_: FrameError) -> Self {
        Self::OutOfFrames
    }
}

/// Pipe failures (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    /// Id does not name a live pipe.
    NotFound,
    /// Write would fill the ring buffer.
    Full,
    /// Reclaim while a reader is still blocked on it.
    ReaderBlocked,
}

impl fmt::Display for PipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "no such pipe",
            Self::Full => "pipe is full",
            Self::ReaderBlocked => "a reader is still blocked on this pipe",
        };
        f.write_str(s)
    }
}

/// Lock/condition-variable failures (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// Id does not name a live lock or cvar.
    NotFound,
    /// Release (or cvar_wait) by a process that doesn't hold the lock.
    NotOwner,
    /// Reclaim while the wait list is non-empty.
    WaitersPresent,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "no such lock or condition variable",
            Self::NotOwner => "caller does not hold this lock",
            Self::WaitersPresent => "object still has waiters",
        };
        f.write_str(s)
    }
}

/// Terminal I/O failures (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtyError {
    /// Terminal index outside the configured terminal count.
    NoSuchTerminal,
}

impl fmt::Display for TtyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchTerminal => f.write_str("no such terminal"),
        }
    }
}

/// Top-level kernel error, the union of every subsystem's error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// See [`SyscallError`].
    Syscall(SyscallError),
    /// See [`FrameError`].
    Frame(FrameError),
    /// See [`PagingError`].
    Paging(PagingError),
    /// See [`PipeError`].
    Pipe(PipeError),
    /// See [`SyncError`].
    Sync(SyncError),
    /// See [`TtyError`].
    Tty(TtyError),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syscall(e) => write!(f, "syscall error: {e}"),
            Self::Frame(e) => write!(f, "frame error: {e}"),
            Self::Paging(e) => write!(f, "paging error: {e}"),
            Self::Pipe(e) => write!(f, "pipe error: {e}"),
            Self::Sync(e) => write!(f, "sync error: {e}"),
            Self::Tty(e) => write!(f, "tty error: {e}"),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<SyscallError> for KernelError {
    fn from(e: SyscallError) -> Self {
        Self::Syscall(e)
    }
}
impl From<FrameError> for KernelError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}
impl From<PagingError> for KernelError {
    fn from(e: PagingError) -> Self {
        Self::Paging(e)
    }
}
impl From<PipeError> for KernelError {
    fn from(e: PipeError) -> Self {
        Self::Pipe(e)
    }
}
impl From<SyncError> for KernelError {
    fn from(e: SyncError) -> Self {
        Self::Sync(e)
    }
}
impl From<TtyError> for KernelError {
    fn from(e: TtyError) -> Self {
        Self::Tty(e)
    }
}

/// Map any subsystem error reaching a syscall boundary onto the errno the
/// caller's register 0 receives. Faults that have no natural errno (e.g. a
/// frame exhaustion discovered mid page-table edit) fall back to `ENOMEM`.
impl KernelError {
    #[must_use]
    pub const fn as_errno(self) -> i64 {
        match self {
            Self::Syscall(e) => e.as_errno(),
            Self::Frame(FrameError::NoMemory) => SyscallError::ENOMEM.as_errno(),
            Self::Paging(_) => SyscallError::EINVAL.as_errno(),
            Self::Pipe(PipeError::NotFound) => SyscallError::EINVAL.as_errno(),
            Self::Pipe(PipeError::Full) => SyscallError::EAGAIN.as_errno(),
            Self::Pipe(PipeError::ReaderBlocked) => SyscallError::EBUSY.as_errno(),
            Self::Sync(SyncError::NotFound) => SyscallError::EINVAL.as_errno(),
            Self::Sync(SyncError::NotOwner) => SyscallError::EPERM.as_errno(),
            Self::Sync(SyncError::WaitersPresent) => SyscallError::EBUSY.as_errno(),
            Self::Tty(_) => SyscallError::EINVAL.as_errno(),
        }
    }
}
