//! Preparation and invocation of a trampoline buffer below 1 MiB.

use crate::image::{ImageLayout, csm_thunk16_transfer, image_bytes};
use crate::{RealModeThunk, SegmentDescriptor, ThunkAttributes};
use csm_registers::RegisterSet;

/// Real-mode code can only address the first megabyte.
const REAL_MODE_LIMIT: usize = 0x10_0000;

/// Smallest usable real-mode stack. The transition code itself needs 60
/// bytes for the register save area and far-return frame; callees get the
/// rest.
pub const MIN_STACK_LEN: usize = 1024;

/// A caller-provided low-memory buffer bound to the trampoline image.
///
/// The front of the buffer receives the patched image, the remainder serves
/// as the real-mode stack handed to callees. [`prepare`](Self::prepare)
/// must run once before [`invoke`](Self::invoke); invoking an unprepared
/// context is a contract violation and panics.
pub struct ThunkContext<'buf> {
    buffer: &'buf mut [u8],
    base: u32,
    attributes: ThunkAttributes,
    stack_offset: usize,
    prepared: bool,
}

impl<'buf> ThunkContext<'buf> {
    /// Binds a context to an identity-mapped buffer below 1 MiB.
    ///
    /// # Panics
    ///
    /// Panics if any part of the buffer lies at or above 1 MiB.
    #[must_use]
    pub fn new(buffer: &'buf mut [u8]) -> Self {
        let addr = buffer.as_ptr() as usize;
        assert!(
            addr.checked_add(buffer.len()).is_some_and(|end| end <= REAL_MODE_LIMIT),
            "thunk buffer must lie entirely below 1 MiB"
        );
        #[allow(clippy::cast_possible_truncation)]
        let base = addr as u32;
        Self::with_base(buffer, base)
    }

    /// Binds a context to a buffer whose low-memory address is tracked
    /// separately from its storage.
    ///
    /// Patching is pure byte manipulation, so staging and inspecting an
    /// image for an arbitrary destination does not require the storage to
    /// live there; only [`invoke`](Self::invoke) does.
    #[must_use]
    pub fn with_base(buffer: &'buf mut [u8], base: u32) -> Self {
        Self {
            buffer,
            base,
            attributes: ThunkAttributes::new(),
            stack_offset: 0,
            prepared: false,
        }
    }

    /// The linear address the image is patched for.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// The attributes the image was prepared with.
    #[must_use]
    pub const fn attributes(&self) -> ThunkAttributes {
        self.attributes
    }

    /// Copies the trampoline image into the buffer and patches it for the
    /// buffer's address: both 16-bit segment descriptors are rebased onto
    /// the buffer, their limits shrunk to 64 KiB unless big real mode is
    /// requested, the entry offset adjusted for sub-paragraph alignment,
    /// and the GDT pointer and attribute slots filled in.
    ///
    /// # Panics
    ///
    /// Panics if the attributes combine both A20 strategies, if the buffer
    /// extends past 1 MiB for its patched base, or if it is too small for
    /// the image plus [`MIN_STACK_LEN`] bytes of stack.
    pub fn prepare(&mut self, attributes: ThunkAttributes) {
        assert!(attributes.is_valid(), "A20 gating strategies are mutually exclusive");
        assert!(
            (self.base as usize)
                .checked_add(self.buffer.len())
                .is_some_and(|end| end <= REAL_MODE_LIMIT),
            "thunk buffer must lie entirely below 1 MiB"
        );

        let layout = ImageLayout::native();
        let stack_offset = (layout.size + 0xf) & !0xf;
        assert!(
            self.buffer.len() >= stack_offset + MIN_STACK_LEN,
            "thunk buffer too small for image and stack"
        );

        self.buffer[..layout.size].copy_from_slice(image_bytes());
        patch_image(self.buffer, &layout, self.base, attributes);

        self.attributes = attributes;
        self.stack_offset = stack_offset;
        self.prepared = true;
        log::debug!(
            "prepared real-mode thunk at {:#07x}, stack {:#07x}..{:#07x}, attributes {:#x}",
            self.base,
            self.base as usize + stack_offset,
            self.base as usize + self.buffer.len(),
            attributes.into_bits()
        );
    }

    /// Drops to real mode, runs the code named by `regs`, and writes the
    /// callee's final register state back into `regs`.
    ///
    /// # Safety
    ///
    /// `regs` must name a valid real-mode `CS:EIP` to far-call and an
    /// `SS:ESP` naming writable low memory with enough headroom below it
    /// for the register save area. Low memory must be identity mapped, the
    /// firmware GDT must reside below 4 GiB, and nothing else may be
    /// executing on this CPU. The callee gets the machine; it must return
    /// with a far return and must not clobber the trampoline buffer.
    ///
    /// # Panics
    ///
    /// Panics if the context has not been prepared or if its storage does
    /// not actually live at the patched base address.
    pub unsafe fn invoke(&mut self, regs: &mut RegisterSet) {
        assert!(self.prepared, "thunk context has not been prepared");
        assert_eq!(
            self.buffer.as_ptr() as usize,
            self.base as usize,
            "thunk buffer is not identity mapped at its patched base"
        );
        // SAFETY: the buffer holds a patched image for its own address and
        // the caller vouches for the register file and the machine state.
        let updated = unsafe { csm_thunk16_transfer(regs, self.buffer.as_mut_ptr()) };
        // SAFETY: the transfer returns a pointer to the 56-byte save area
        // on the real-mode stack, which holds a valid register file.
        *regs = unsafe { *updated };
    }
}

impl RealModeThunk for ThunkContext<'_> {
    fn stack_base(&self) -> u32 {
        assert!(self.prepared, "thunk context has not been prepared");
        #[allow(clippy::cast_possible_truncation)]
        let offset = self.stack_offset as u32;
        self.base + offset
    }

    fn stack(&mut self) -> &mut [u8] {
        assert!(self.prepared, "thunk context has not been prepared");
        &mut self.buffer[self.stack_offset..]
    }

    unsafe fn transfer(&mut self, regs: &mut RegisterSet) {
        // SAFETY: forwarded contract.
        unsafe { self.invoke(regs) }
    }
}

/// Rewrites the patch slots of a staged image for the destination `base`.
fn patch_image(bytes: &mut [u8], layout: &ImageLayout, base: u32, attributes: ThunkAttributes) {
    let aligned = base & !0xf;
    for offset in [layout.code_descriptor(), layout.data_descriptor()] {
        let raw = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
        #[allow(clippy::cast_possible_truncation)]
        let mut desc = SegmentDescriptor::from_bits(raw)
            .with_base_low(aligned as u16)
            .with_base_mid((base >> 16) as u8);
        if !attributes.big_real_mode() {
            // Architectural 64 KiB segments: drop page granularity and the
            // high limit nibble, keeping limit_low = 0xffff.
            desc = desc.with_granularity(false).with_limit_high(0);
        }
        bytes[offset..offset + 8].copy_from_slice(&desc.into_bits().to_le_bytes());
    }

    // The code segment base is paragraph aligned, so the sub-paragraph
    // remainder moves into the entry offset.
    let entry = layout.transition;
    let offset = u32::from_le_bytes(bytes[entry..entry + 4].try_into().unwrap());
    bytes[entry..entry + 4].copy_from_slice(&(offset + (base & 0xf)).to_le_bytes());

    let gdt_linear = u64::from(base) + layout.gdt as u64;
    bytes[layout.gdtr_base..layout.gdtr_base + 8].copy_from_slice(&gdt_linear.to_le_bytes());

    bytes[layout.thunk_attr..layout.thunk_attr + 4]
        .copy_from_slice(&attributes.into_bits().to_le_bytes());
}
