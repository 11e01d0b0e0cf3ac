use bitfield_struct::bitfield;
use core::fmt;

/// The 16-bit flags image carried in a [`BiosCallFrame`].
///
/// Only the low word exists in this view; callers inspect CF (and friends)
/// here after a service returns.
#[bitfield(u16, order = Lsb)]
pub struct FrameFlags {
    /// Carry, the near-universal BIOS error indicator.
    pub cf_carry: bool,
    /// Reads as one on every IA-32 processor.
    #[bits(1, default = true)]
    _always_one: bool,
    /// Parity.
    pub pf_parity: bool,
    #[bits(1)]
    _reserved3: bool,
    /// Auxiliary carry.
    pub af_adjust: bool,
    #[bits(1)]
    _reserved5: bool,
    /// Zero.
    pub zf_zero: bool,
    /// Sign.
    pub sf_sign: bool,
    /// Trap (single-step).
    pub tf_trap: bool,
    /// Interrupt enable.
    pub if_interrupt_enable: bool,
    /// Direction.
    pub df_direction: bool,
    /// Overflow.
    pub of_overflow: bool,
    /// I/O privilege level.
    #[bits(2)]
    pub iopl: u8,
    /// Nested task.
    pub nt_nested: bool,
    #[bits(1)]
    _reserved15: bool,
}

/// 32-bit view of a BIOS call frame.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct FrameDwordRegs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    /// Raw flags dword; the word view decodes the interesting bits.
    pub eflags: u32,
    pub es: u16,
    pub cs: u16,
    pub ss: u16,
    pub ds: u16,
    pub fs: u16,
    pub gs: u16,
    pub ebp: u32,
    pub esp: u32,
}

/// 16-bit view of a BIOS call frame, each general register padded to dword
/// width so it overlays [`FrameDwordRegs`] exactly.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct FrameWordRegs {
    pub ax: u16,
    _reserved1: u16,
    pub bx: u16,
    _reserved2: u16,
    pub cx: u16,
    _reserved3: u16,
    pub dx: u16,
    _reserved4: u16,
    pub si: u16,
    _reserved5: u16,
    pub di: u16,
    _reserved6: u16,
    pub flags: FrameFlags,
    _reserved7: u16,
    pub es: u16,
    pub cs: u16,
    pub ss: u16,
    pub ds: u16,
    pub fs: u16,
    pub gs: u16,
    pub bp: u16,
    _reserved8: u16,
    pub sp: u16,
    _reserved9: u16,
}

/// 8-bit view of the byte-addressable registers in a BIOS call frame.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct FrameByteRegs {
    pub al: u8,
    pub ah: u8,
    _reserved1: u16,
    pub bl: u8,
    pub bh: u8,
    _reserved2: u16,
    pub cl: u8,
    pub ch: u8,
    _reserved3: u16,
    pub dl: u8,
    pub dh: u8,
    _reserved4: u16,
}

/// The register frame exchanged with legacy BIOS services.
///
/// This is the classic firmware-interface layout (EAX first, flags in the
/// middle), distinct from the save-area ordering the thunk machinery uses
/// internally; the calling-convention layer translates between the two.
#[repr(C)]
pub union BiosCallFrame {
    e: FrameDwordRegs,
    x: FrameWordRegs,
    h: FrameByteRegs,
}

const _: () = {
    assert!(size_of::<BiosCallFrame>() == 48);
    assert!(size_of::<FrameDwordRegs>() == 48);
    assert!(size_of::<FrameWordRegs>() == 48);
    assert!(core::mem::offset_of!(FrameDwordRegs, eflags) == 24);
    assert!(core::mem::offset_of!(FrameDwordRegs, es) == 28);
    assert!(core::mem::offset_of!(FrameDwordRegs, ebp) == 40);
    assert!(core::mem::offset_of!(FrameDwordRegs, esp) == 44);
    assert!(core::mem::offset_of!(FrameWordRegs, flags) == 24);
};

impl BiosCallFrame {
    /// An all-zero frame.
    #[must_use]
    pub fn zeroed() -> Self {
        // SAFETY: the all-zero bit pattern is valid for every view.
        unsafe { core::mem::zeroed() }
    }

    /// The 32-bit register view.
    #[inline]
    #[must_use]
    pub const fn e(&self) -> &FrameDwordRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &self.e }
    }

    /// The 32-bit register view, mutable.
    #[inline]
    #[must_use]
    pub const fn e_mut(&mut self) -> &mut FrameDwordRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &mut self.e }
    }

    /// The 16-bit register view.
    #[inline]
    #[must_use]
    pub const fn x(&self) -> &FrameWordRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &self.x }
    }

    /// The 16-bit register view, mutable.
    #[inline]
    #[must_use]
    pub const fn x_mut(&mut self) -> &mut FrameWordRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &mut self.x }
    }

    /// The 8-bit register view.
    #[inline]
    #[must_use]
    pub const fn h(&self) -> &FrameByteRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &self.h }
    }

    /// The 8-bit register view, mutable.
    #[inline]
    #[must_use]
    pub const fn h_mut(&mut self) -> &mut FrameByteRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &mut self.h }
    }
}

impl Clone for BiosCallFrame {
    fn clone(&self) -> Self {
        *self
    }
}

impl Copy for BiosCallFrame {}

impl Default for BiosCallFrame {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for BiosCallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = self.e();
        f.debug_struct("BiosCallFrame")
            .field("eax", &format_args!("{:#010x}", e.eax))
            .field("ebx", &format_args!("{:#010x}", e.ebx))
            .field("ecx", &format_args!("{:#010x}", e.ecx))
            .field("edx", &format_args!("{:#010x}", e.edx))
            .field("esi", &format_args!("{:#010x}", e.esi))
            .field("edi", &format_args!("{:#010x}", e.edi))
            .field("ds", &format_args!("{:#06x}", e.ds))
            .field("es", &format_args!("{:#06x}", e.es))
            .field("flags", &format_args!("{:#06x}", self.x().flags.into_bits()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_and_byte_views_alias_the_dwords() {
        let mut frame = BiosCallFrame::zeroed();
        frame.e_mut().eax = 0x0000_4f02;
        assert_eq!(frame.x().ax, 0x4f02);
        assert_eq!(frame.h().ah, 0x4f);
        assert_eq!(frame.h().al, 0x02);

        frame.h_mut().bh = 0x12;
        assert_eq!(frame.e().ebx, 0x0000_1200);
    }

    #[test]
    fn flags_word_aliases_the_flags_dword() {
        let mut frame = BiosCallFrame::zeroed();
        frame.e_mut().eflags = 0x0000_0001;
        assert!(frame.x().flags.cf_carry());

        frame.x_mut().flags = FrameFlags::from_bits(0).with_zf_zero(true);
        assert_eq!(frame.e().eflags, 0x40);
    }
}
