//! Legacy BIOS calling conventions on top of the real-mode thunk engine.
//!
//! Callers describe a service invocation in a [`BiosCallFrame`] — the
//! classic firmware register layout with EAX first and the flags word in
//! the middle — and this crate marshals it into the thunk's save-area
//! layout, seeds the flags the way a BIOS expects (IOPL 3, carry clear,
//! interrupt flag per call style), places the real-mode stack, runs the
//! callee through a [`RealModeThunk`](csm_thunk::RealModeThunk), and
//! marshals the results back.
//!
//! [`far_call86`] performs a plain far call, for entry points like option
//! ROM initialization or the 32-bit PCI BIOS directory. [`int_call86`]
//! enters a caller-resolved interrupt handler with interrupts disabled,
//! the way a hardware `INT` would.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod call;
mod frame;

pub use call::{efi_offset, efi_segment, far_call86, int_call86};
pub use frame::{BiosCallFrame, FrameByteRegs, FrameDwordRegs, FrameFlags, FrameWordRegs};
