use crate::frame::{BiosCallFrame, FrameFlags};
use csm_registers::{Eflags, RegisterSet};
use csm_thunk::RealModeThunk;

/// Real-mode segment of a linear address, normalized so the paired
/// [`efi_offset`] can span a full 64 KiB window.
#[must_use]
pub const fn efi_segment(address: u32) -> u16 {
    ((address >> 4) & 0xf000) as u16
}

/// Real-mode offset of a linear address, paired with [`efi_segment`].
#[must_use]
pub const fn efi_offset(address: u32) -> u16 {
    (address & 0xffff) as u16
}

/// Far-calls a real-mode service at `segment:offset`.
///
/// Registers are taken from and returned through `frame`; an optional
/// parameter block is staged at the top of the real-mode stack, so the
/// callee finds it at `SS:SP` on entry (above the far return address).
/// Returns the callee's carry flag, the conventional error indicator.
///
/// # Safety
///
/// `segment:offset` must name real-mode code that returns with a far
/// return, and the machine-state contract of the underlying
/// [`RealModeThunk::transfer`] must hold.
pub unsafe fn far_call86<T: RealModeThunk>(
    thunk: &mut T,
    segment: u16,
    offset: u16,
    frame: &mut BiosCallFrame,
    param_block: Option<&mut [u8]>,
) -> bool {
    // SAFETY: forwarded contract.
    unsafe { legacy_call(thunk, segment, offset, frame, param_block, false) }
}

/// Invokes an interrupt-style entry point at `segment:offset`, typically
/// resolved from the real-mode vector table by the caller.
///
/// The only difference from [`far_call86`] is the flag handling: the
/// callee starts with interrupts disabled, as a hardware `INT` would leave
/// them, and the seeded flags word is staged above the return address so
/// the handler's `IRET` pops a valid flags image.
///
/// # Safety
///
/// Same contract as [`far_call86`].
pub unsafe fn int_call86<T: RealModeThunk>(
    thunk: &mut T,
    segment: u16,
    offset: u16,
    frame: &mut BiosCallFrame,
) -> bool {
    // SAFETY: forwarded contract.
    unsafe { legacy_call(thunk, segment, offset, frame, None, true) }
}

/// Marshals a [`BiosCallFrame`] into the thunk's register save layout,
/// runs the callee, and marshals the results back.
unsafe fn legacy_call<T: RealModeThunk>(
    thunk: &mut T,
    segment: u16,
    offset: u16,
    frame: &mut BiosCallFrame,
    param_block: Option<&mut [u8]>,
    interrupt_style: bool,
) -> bool {
    let mut regs = RegisterSet::zeroed();
    {
        let x = frame.x();
        let rx = regs.x_mut();
        rx.di = x.di;
        rx.si = x.si;
        rx.bp = x.bp;
        rx.bx = x.bx;
        rx.dx = x.dx;
        rx.ax = x.ax;
    }
    // ECX crosses as a full dword; PCI BIOS services take dword arguments
    // there.
    regs.e_mut().ecx = frame.e().ecx;
    regs.e_mut().ds = frame.e().ds;
    regs.e_mut().es = frame.e().es;

    // Reserved bit 1 always reads as one; IOPL 3 so the callee may use
    // CLI/STI and port I/O freely. Interrupt handlers start with IF clear,
    // far calls with IF set.
    let mut flag_bits = u64::from(frame.x().flags.into_bits());
    flag_bits |= 0x2;
    let seeded = Eflags::from_bits(flag_bits)
        .with_cf_carry(false)
        .with_tf_trap(false)
        .with_nt_nested(false)
        .with_iopl(3)
        .with_if_interrupt_enable(!interrupt_style);
    regs.e_mut().eflags = seeded;

    // An interrupt handler leaves with IRET, which pops the flags word a
    // hardware INT would have pushed; stage the seeded flags as that word.
    let mut iret_image;
    let param_block = if interrupt_style {
        #[allow(clippy::cast_possible_truncation)]
        {
            iret_image = (seeded.into_bits() as u16).to_le_bytes();
        }
        Some(&mut iret_image[..])
    } else {
        param_block
    };

    #[allow(clippy::cast_possible_truncation)]
    let stack_len = thunk.stack().len() as u32;
    let mut stack16 = thunk.stack_base() + stack_len - 2;
    let mut staged_at = None;
    if let Some(block) = param_block.as_deref() {
        #[allow(clippy::cast_possible_truncation)]
        let staged = ((block.len() + 1) & !1) as u32;
        stack16 -= staged;
        let at = (stack16 - thunk.stack_base()) as usize;
        thunk.stack()[at..at + block.len()].copy_from_slice(block);
        staged_at = Some(at);
    }
    #[allow(clippy::cast_possible_truncation)]
    {
        regs.e_mut().ss = ((stack16 >> 16) << 12) as u16;
    }
    regs.e_mut().esp = stack16 & 0xffff;

    regs.e_mut().cs = segment;
    regs.e_mut().eip = u32::from(offset);

    log::trace!(
        "real-mode {} {segment:04x}:{offset:04x} ax={:#06x} stack {stack16:#07x}",
        if interrupt_style { "int" } else { "call" },
        frame.x().ax,
    );

    // SAFETY: forwarded contract.
    unsafe { thunk.transfer(&mut regs) };

    // The callee may have written through the block; hand its view back.
    if let (Some(block), Some(at)) = (param_block, staged_at) {
        block.copy_from_slice(&thunk.stack()[at..at + block.len()]);
    }

    let result = *regs.e();
    let e = frame.e_mut();
    e.edi = result.edi;
    e.esi = result.esi;
    e.ebp = result.ebp;
    e.ebx = result.ebx;
    e.edx = result.edx;
    e.ecx = result.ecx;
    e.eax = result.eax;
    e.ss = result.ss;
    e.cs = result.cs;
    e.ds = result.ds;
    e.es = result.es;
    #[allow(clippy::cast_possible_truncation)]
    let returned_flags = FrameFlags::from_bits(result.eflags.into_bits() as u16);
    frame.x_mut().flags = returned_flags;

    returned_flags.cf_carry()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK_BASE: u32 = 0x7_0000;
    const STACK_LEN: usize = 0x1000;

    /// Captures the marshaled register set and plays back a canned callee
    /// response in place of a CPU mode switch.
    struct MockThunk {
        stack: Vec<u8>,
        captured: Option<RegisterSet>,
        respond: fn(&mut RegisterSet),
    }

    impl MockThunk {
        fn new(respond: fn(&mut RegisterSet)) -> Self {
            Self {
                stack: vec![0u8; STACK_LEN],
                captured: None,
                respond,
            }
        }

        fn captured(&self) -> &RegisterSet {
            self.captured.as_ref().expect("transfer was never invoked")
        }
    }

    impl RealModeThunk for MockThunk {
        fn stack_base(&self) -> u32 {
            STACK_BASE
        }

        fn stack(&mut self) -> &mut [u8] {
            &mut self.stack
        }

        unsafe fn transfer(&mut self, regs: &mut RegisterSet) {
            self.captured = Some(*regs);
            (self.respond)(regs);
        }
    }

    #[test]
    fn marshals_registers_and_entry_point_into_the_save_layout() {
        let mut thunk = MockThunk::new(|_| {});
        let mut frame = BiosCallFrame::zeroed();
        frame.x_mut().ax = 0x4f00;
        frame.x_mut().bx = 0x0103;
        frame.e_mut().ecx = 0xdead_beef;
        frame.e_mut().es = 0x2000;
        frame.e_mut().ds = 0x3000;

        let carry = unsafe { far_call86(&mut thunk, 0xc000, 0x0003, &mut frame, None) };
        assert!(!carry);

        let sent = thunk.captured().e();
        assert_eq!(sent.eax, 0x4f00);
        assert_eq!(sent.ebx, 0x0103);
        assert_eq!(sent.ecx, 0xdead_beef, "ECX crosses as a full dword");
        assert_eq!(sent.es, 0x2000);
        assert_eq!(sent.ds, 0x3000);
        assert_eq!(sent.cs, 0xc000);
        assert_eq!(sent.eip, 0x0003);
    }

    #[test]
    fn seeds_flags_for_a_far_call() {
        let mut thunk = MockThunk::new(|_| {});
        let mut frame = BiosCallFrame::zeroed();
        frame.x_mut().flags = FrameFlags::from_bits(0)
            .with_cf_carry(true)
            .with_tf_trap(true)
            .with_nt_nested(true);

        unsafe { far_call86(&mut thunk, 0xf000, 0xfff0, &mut frame, None) };

        let flags = thunk.captured().e().eflags;
        assert!(!flags.cf_carry(), "carry is cleared going in");
        assert!(!flags.tf_trap());
        assert!(!flags.nt_nested());
        assert_eq!(flags.iopl(), 3);
        assert!(flags.if_interrupt_enable());
        assert_eq!(flags.into_bits() & 0x2, 0x2);
    }

    #[test]
    fn interrupt_style_enters_with_interrupts_disabled() {
        let mut thunk = MockThunk::new(|_| {});
        let mut frame = BiosCallFrame::zeroed();

        unsafe { int_call86(&mut thunk, 0xf000, 0xe6f2, &mut frame) };

        assert!(!thunk.captured().e().eflags.if_interrupt_enable());
    }

    #[test]
    fn interrupt_style_stages_an_iret_flags_image() {
        let mut thunk = MockThunk::new(|_| {});
        let mut frame = BiosCallFrame::zeroed();

        unsafe { int_call86(&mut thunk, 0xf000, 0xe6f2, &mut frame) };

        // The handler's IRET pops a flags word from above the far-return
        // frame; it must be the seeded image, not stack garbage.
        let sent = *thunk.captured().e();
        let linear = (u32::from(sent.ss) << 4) + sent.esp;
        assert_eq!(linear, STACK_BASE + STACK_LEN as u32 - 2 - 2);
        let at = (linear - STACK_BASE) as usize;
        let word = u16::from_le_bytes(thunk.stack[at..at + 2].try_into().unwrap());
        assert_eq!(u64::from(word), sent.eflags.into_bits() & 0xffff);
        assert_eq!(word & 0x200, 0, "IF clear in the popped image");
        assert_eq!(word & 0x3000, 0x3000, "IOPL 3 in the popped image");
    }

    #[test]
    fn places_the_stack_at_the_top_of_the_scratch_region() {
        let mut thunk = MockThunk::new(|_| {});
        let mut frame = BiosCallFrame::zeroed();

        unsafe { far_call86(&mut thunk, 0xc000, 0x0003, &mut frame, None) };

        let sent = thunk.captured().e();
        let linear = (u32::from(sent.ss) << 4) + sent.esp;
        assert_eq!(linear, STACK_BASE + STACK_LEN as u32 - 2);
        assert_eq!(sent.ss, 0x7000);
        assert_eq!(sent.esp, 0x0ffe);
    }

    #[test]
    fn stages_the_parameter_block_at_the_callee_stack_pointer() {
        let mut thunk = MockThunk::new(|_| {});
        let mut frame = BiosCallFrame::zeroed();
        let mut block = [0x11u8, 0x22, 0x33, 0x44, 0x55, 0x66];
        let original = block;

        unsafe { far_call86(&mut thunk, 0xc000, 0x0003, &mut frame, Some(&mut block)) };

        let sent = *thunk.captured().e();
        let linear = (u32::from(sent.ss) << 4) + sent.esp;
        assert_eq!(linear, STACK_BASE + STACK_LEN as u32 - 2 - 6);
        let at = (linear - STACK_BASE) as usize;
        assert_eq!(&thunk.stack[at..at + block.len()], &original);
    }

    #[test]
    fn parameter_block_mutations_flow_back_to_the_caller() {
        /// Inverts every byte of the staged block in place, as a callee
        /// would through its SS segment.
        struct InvertingThunk {
            stack: Vec<u8>,
        }

        impl RealModeThunk for InvertingThunk {
            fn stack_base(&self) -> u32 {
                STACK_BASE
            }

            fn stack(&mut self) -> &mut [u8] {
                &mut self.stack
            }

            unsafe fn transfer(&mut self, regs: &mut RegisterSet) {
                let linear = (u32::from(regs.e().ss) << 4) + regs.e().esp;
                let at = (linear - STACK_BASE) as usize;
                for byte in &mut self.stack[at..at + 4] {
                    *byte = !*byte;
                }
            }
        }

        let mut thunk = InvertingThunk {
            stack: vec![0u8; STACK_LEN],
        };
        let mut frame = BiosCallFrame::zeroed();
        let mut block = [0x0fu8, 0xf0, 0xaa, 0x55];

        unsafe { far_call86(&mut thunk, 0xc000, 0x0003, &mut frame, Some(&mut block)) };

        assert_eq!(block, [0xf0, 0x0f, 0x55, 0xaa]);
    }

    #[test]
    fn vbe_style_query_succeeds_without_carry() {
        let mut thunk = MockThunk::new(|regs| {
            regs.x_mut().ax = 0x004f;
            let bits = regs.e().eflags.into_bits() & !1;
            regs.e_mut().eflags = Eflags::from_bits(bits);
        });
        let mut frame = BiosCallFrame::zeroed();
        frame.x_mut().ax = 0x4f00;
        frame.e_mut().es = 0x2000;

        let entry = 0x000c_0003;
        let carry = unsafe {
            far_call86(&mut thunk, efi_segment(entry), efi_offset(entry), &mut frame, None)
        };

        assert!(!carry);
        assert_eq!(frame.x().ax, 0x004f, "VBE success signature");
        assert_eq!(thunk.captured().e().cs, 0xc000);
        assert_eq!(thunk.captured().e().eip, 0x0003);
    }

    #[test]
    fn copies_results_back_and_reports_carry() {
        let mut thunk = MockThunk::new(|regs| {
            let e = regs.e_mut();
            e.eax = 0x0000_004f;
            e.ebx = 0x1234_5678;
            e.edx = 0x0000_c0de;
            e.edi = 0x000a_0b0c;
            e.esi = 0x0d0e_0f10;
            e.ebp = 0x0001_0203;
            e.es = 0x9000;
            e.eflags = Eflags::from_bits(e.eflags.into_bits()).with_cf_carry(true);
        });
        let mut frame = BiosCallFrame::zeroed();
        frame.x_mut().ax = 0x4f01;

        let carry = unsafe { far_call86(&mut thunk, 0xc000, 0x0003, &mut frame, None) };

        assert!(carry);
        assert!(frame.x().flags.cf_carry());
        assert_eq!(frame.h().al, 0x4f);
        assert_eq!(frame.e().ebx, 0x1234_5678);
        assert_eq!(frame.x().dx, 0xc0de);
        assert_eq!(frame.e().edi, 0x000a_0b0c);
        assert_eq!(frame.e().esi, 0x0d0e_0f10);
        assert_eq!(frame.e().ebp, 0x0001_0203);
        assert_eq!(frame.e().es, 0x9000);
    }

    #[test]
    fn segment_offset_split_spans_the_full_window() {
        assert_eq!(efi_segment(0x000c_0000), 0xc000);
        assert_eq!(efi_offset(0x000c_0000), 0x0000);
        assert_eq!(efi_segment(0x000c_0003), 0xc000);
        assert_eq!(efi_offset(0x000c_0003), 0x0003);
        assert_eq!(efi_segment(0x0002_1234), 0x2000);
        assert_eq!(efi_offset(0x0002_1234), 0x1234);
        assert_eq!(efi_segment(0x000f_fff0), 0xf000);
        assert_eq!(efi_offset(0x000f_fff0), 0xfff0);
    }
}
