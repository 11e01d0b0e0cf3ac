//! Low-memory (below 1 MiB) layout and placement.
//!
//! Legacy code hardwires where things live in the first megabyte: the IVT
//! and BDA at the bottom, conventional memory to 0xA0000, the VGA BIOS
//! shadow at 0xC0000, the BIOS ROM shadow below the 1 MiB line. This crate
//! carries those [`layout`] constants, splits a low-stub allocation into
//! tables, thunk buffer and stack ([`StubLayout`]), and hands out pieces of
//! a raw low-memory range through the reserve-and-fill [`LowMemoryArena`].
//!
//! Nothing here touches the hardware; callers bring the memory (a UEFI
//! page allocation on target, a plain buffer in tests).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod arena;
pub mod layout;

pub use arena::LowMemoryArena;
pub use layout::{
    BIOS_ROM_END, CONVENTIONAL_END, LOW_MEMORY_TOP, LOW_STACK_LEN, LOW_STUB_BASE, PAGE_SIZE,
    StubLayout, VGA_BIOS_BASE, VGA_BIOS_END,
};

use thiserror::Error;

/// Placement failures. All recoverable; callers decide whether a missing
/// table is fatal for their boot flow.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LowMemError {
    /// The arena (or stub region) cannot fit the request.
    #[error("low memory exhausted: {requested:#x} bytes requested, {available:#x} available")]
    Exhausted { requested: usize, available: usize },

    /// Alignment must be a power of two.
    #[error("invalid alignment {0:#x}")]
    BadAlignment(usize),

    /// The addressed range is not inside the managed region.
    #[error("range {base:#07x}+{len:#x} lies outside the managed low-memory region")]
    OutOfRange { base: u32, len: usize },
}
