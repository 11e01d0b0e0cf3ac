//! Bump allocation over a raw low-memory range.

use crate::{LOW_MEMORY_TOP, LowMemError};

/// A reserve-and-fill arena over memory below 1 MiB.
///
/// The arena tracks the *linear* address of each reservation separately
/// from its storage, so the carving logic works the same over an
/// identity-mapped physical range on target and a plain byte buffer in
/// tests. Reservations never come back; legacy tables stay where they are
/// put for the lifetime of the machine.
pub struct LowMemoryArena<'a> {
    memory: &'a mut [u8],
    base: u32,
    cursor: usize,
}

impl<'a> LowMemoryArena<'a> {
    /// Wraps a byte range whose first byte sits at linear address `base`.
    ///
    /// # Panics
    ///
    /// Panics if the range reaches past 1 MiB.
    #[must_use]
    pub fn new(memory: &'a mut [u8], base: u32) -> Self {
        assert!(
            (base as usize)
                .checked_add(memory.len())
                .is_some_and(|end| end <= LOW_MEMORY_TOP as usize),
            "arena must lie entirely below 1 MiB"
        );
        Self {
            memory,
            base,
            cursor: 0,
        }
    }

    /// Wraps an identity-mapped physical range.
    ///
    /// # Safety
    ///
    /// `ptr` must point at `len` bytes of writable memory at linear
    /// address `base`, valid and exclusively owned for `'a`.
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut u8, base: u32, len: usize) -> Self {
        // SAFETY: the caller vouches for validity and exclusivity.
        Self::new(unsafe { core::slice::from_raw_parts_mut(ptr, len) }, base)
    }

    /// Linear address of the first byte.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Bytes not yet reserved.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.memory.len() - self.cursor
    }

    /// The whole backing range, reserved parts included.
    #[must_use]
    pub const fn bytes(&self) -> &[u8] {
        self.memory
    }

    /// Reserves `len` bytes at the next linear address aligned to `align`
    /// and returns that address.
    ///
    /// # Errors
    ///
    /// Fails when `align` is not a power of two or the arena cannot fit
    /// the request.
    pub fn reserve(&mut self, len: usize, align: usize) -> Result<u32, LowMemError> {
        if !align.is_power_of_two() {
            return Err(LowMemError::BadAlignment(align));
        }
        let linear = (self.base as usize + self.cursor).next_multiple_of(align);
        let start = linear - self.base as usize;
        let end = start.checked_add(len).ok_or(LowMemError::Exhausted {
            requested: len,
            available: self.remaining(),
        })?;
        if end > self.memory.len() {
            return Err(LowMemError::Exhausted {
                requested: len,
                available: self.remaining(),
            });
        }
        self.cursor = end;
        #[allow(clippy::cast_possible_truncation)]
        let linear = linear as u32;
        log::trace!("reserved {len:#x} bytes at {linear:#07x} (align {align:#x})");
        Ok(linear)
    }

    /// Reserves room for `data` and copies it in, returning the linear
    /// address of the copy.
    ///
    /// # Errors
    ///
    /// Same conditions as [`reserve`](Self::reserve).
    pub fn reserve_filled(&mut self, data: &[u8], align: usize) -> Result<u32, LowMemError> {
        let linear = self.reserve(data.len(), align)?;
        let start = (linear - self.base) as usize;
        self.memory[start..start + data.len()].copy_from_slice(data);
        Ok(linear)
    }

    /// Writes `data` at an exact linear address inside the arena,
    /// independent of the reservation cursor. Table writers use this to
    /// hit addresses legacy code hardwires.
    ///
    /// # Errors
    ///
    /// Fails when any part of the target range lies outside the arena.
    pub fn write_at(&mut self, linear: u32, data: &[u8]) -> Result<(), LowMemError> {
        let start = (linear as usize)
            .checked_sub(self.base as usize)
            .ok_or(LowMemError::OutOfRange {
                base: linear,
                len: data.len(),
            })?;
        let end = start.checked_add(data.len()).filter(|&end| end <= self.memory.len()).ok_or(
            LowMemError::OutOfRange {
                base: linear,
                len: data.len(),
            },
        )?;
        self.memory[start..end].copy_from_slice(data);
        Ok(())
    }
}
