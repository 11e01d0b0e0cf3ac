//! The classic PC low-memory map and the stub split.

use crate::LowMemError;

/// Where the low stub (tables, thunk buffer, stack) is placed. Low enough
/// to predate the EBDA, high enough to clear the IVT, BDA and typical
/// bootloader droppings.
pub const LOW_STUB_BASE: u32 = 0x2_0000;

/// End of conventional memory; video memory begins here.
pub const CONVENTIONAL_END: u32 = 0xA_0000;

/// VGA BIOS shadow window.
pub const VGA_BIOS_BASE: u32 = 0xC_0000;
pub const VGA_BIOS_END: u32 = 0xC_8000;

/// The BIOS ROM shadow runs from the end of the option ROM area up to the
/// top of low memory.
pub const BIOS_ROM_END: u32 = 0x10_0000;

/// Everything real-mode addressable lies below this.
pub const LOW_MEMORY_TOP: u32 = 0x10_0000;

pub const PAGE_SIZE: usize = 4096;

/// Real-mode scratch stack handed to callees.
pub const LOW_STACK_LEN: usize = 8192;

const fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// How a low-stub allocation is carved up: legacy tables at the front,
/// then a page-aligned thunk buffer whose tail doubles as the real-mode
/// stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubLayout {
    /// Linear address of the table area.
    pub table_base: u32,
    /// Bytes reserved for tables.
    pub table_len: usize,
    /// Linear address of the thunk buffer (page aligned).
    pub thunk_base: u32,
    /// Bytes available to the thunk buffer, stack included.
    pub thunk_len: usize,
}

impl StubLayout {
    /// Splits `len` bytes at `base` into a table area of `table_len` bytes
    /// followed by a page-aligned thunk buffer.
    ///
    /// # Errors
    ///
    /// Fails when the remainder after the tables cannot hold a page of
    /// thunk image plus [`LOW_STACK_LEN`] bytes of stack, or when the
    /// region reaches past 1 MiB.
    pub fn compute(base: u32, len: usize, table_len: usize) -> Result<Self, LowMemError> {
        let end = u64::from(base) + len as u64;
        if end > u64::from(LOW_MEMORY_TOP) {
            return Err(LowMemError::OutOfRange { base, len });
        }
        #[allow(clippy::cast_possible_truncation)]
        let end = end as u32;

        #[allow(clippy::cast_possible_truncation)]
        let thunk_base = align_up(base + table_len as u32, PAGE_SIZE as u32);
        let thunk_len = end.saturating_sub(thunk_base) as usize;
        if thunk_len < PAGE_SIZE + LOW_STACK_LEN {
            return Err(LowMemError::Exhausted {
                requested: PAGE_SIZE + LOW_STACK_LEN,
                available: thunk_len,
            });
        }

        Ok(Self {
            table_base: base,
            table_len,
            thunk_base,
            thunk_len,
        })
    }
}
