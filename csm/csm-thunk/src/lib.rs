//! Real-mode thunk engine.
//!
//! Lets long-mode firmware code call 16-bit real-mode services (legacy BIOS
//! entry points, option ROM initialization, software interrupts) and get
//! the full register file back. The design follows the classic Thunk16
//! pattern: a small position-independent image is copied into a
//! caller-provided buffer below 1 MiB, patched for its destination address,
//! and a transfer primitive walks the CPU down from long mode through
//! 16-bit protected mode into real mode and back.
//!
//! * [`ThunkAttributes`] selects big real mode and the post-call A20
//!   handling strategy.
//! * [`ThunkContext`] owns the low-memory buffer, stages and patches the
//!   image, and exposes the unsafe [`invoke`](ThunkContext::invoke).
//! * [`RealModeThunk`] is the narrow interface the BIOS calling-convention
//!   layer consumes, so that layer stays testable off-target.
//!
//! Everything except the transfer machinery itself is portable; the
//! assembly and the invocation path only exist on x86-64.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod attributes;
#[cfg(target_arch = "x86_64")]
mod context;
mod descriptor;
#[cfg(target_arch = "x86_64")]
mod image;

pub use attributes::ThunkAttributes;
#[cfg(target_arch = "x86_64")]
pub use context::{MIN_STACK_LEN, ThunkContext};
pub use descriptor::SegmentDescriptor;
#[cfg(target_arch = "x86_64")]
pub use image::{ImageLayout, image_bytes};

use csm_registers::RegisterSet;

/// The machinery that runs a register file in real mode.
///
/// [`ThunkContext`] is the production implementation; the calling-convention
/// layer is written against this trait so its marshaling logic can be
/// exercised without a CPU mode switch.
pub trait RealModeThunk {
    /// Linear base address of the real-mode stack scratch region.
    fn stack_base(&self) -> u32;

    /// The stack scratch region. Parameter blocks are staged here before
    /// the switch; callees see it as their `SS` segment.
    fn stack(&mut self) -> &mut [u8];

    /// Runs the code named by `regs` in real mode and writes the callee's
    /// final register state back into `regs`.
    ///
    /// # Safety
    ///
    /// `regs` must name a valid real-mode `CS:EIP` and an `SS:ESP` within
    /// writable low memory with headroom for the register save area; the
    /// callee must return with a far return.
    unsafe fn transfer(&mut self, regs: &mut RegisterSet);
}
