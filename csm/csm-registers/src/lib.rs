//! # Legacy x86 Register File
//!
//! Binary-compatible model of the register file a 16-bit real-mode callee
//! sees, exposed through three overlapping views (32-bit, 16-bit, 8-bit)
//! that alias the same storage — the same way `AX` aliases the low word of
//! `EAX` in hardware.
//!
//! The layout is load-bearing: the mode-transition code restores this
//! structure with `popal`/segment pops and a 32-bit far return, so the field
//! order *is* the real-mode stack image. Do not reorder fields.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod eflags;
mod set;

pub use eflags::Eflags;
pub use set::{ByteRegs, DwordRegs, RegisterSet, WordRegs};
