//! Physical frame accounting and the two page-table regions.

pub mod frame;
pub mod kernel_table;
pub mod user_table;

pub use crate::hal::PAGE_SIZE;

/// Read+write, non-executable.
pub const PROT_RW: u8 = 0b01;
/// Read+execute, non-writable.
pub const PROT_RX: u8 = 0b10;

/// The page index containing `addr` (floor division). Used where the
/// caller wants "which page is this byte in" (a fault address, a page
/// table lookup) rather than "how many pages does this many bytes need"
/// (that's [`pages_for`]).
#[must_use]
pub const fn page_of(addr: u64) -> usize {
    (addr as usize) / PAGE_SIZE
}

/// Round a byte size up to a whole number of pages.
#[must_use]
pub const fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}
