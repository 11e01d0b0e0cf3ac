use crate::Eflags;
use core::fmt;

/// 32-bit view of the register file.
///
/// Field order matches the save area the transition code builds on the
/// real-mode stack: the eight general registers restore with a single
/// `popal`, the segment registers pop as words, and the trailing
/// EIP/CS/SS triple is consumed by the 32-bit far return into the callee.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct DwordRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub eflags: Eflags,
    pub eip: u32,
    pub cs: u16,
    pub ss: u16,
}

/// 16-bit view of the general registers, each padded to dword width so it
/// overlays [`DwordRegs`] exactly.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct WordRegs {
    pub di: u16,
    _reserved1: u16,
    pub si: u16,
    _reserved2: u16,
    pub bp: u16,
    _reserved3: u16,
    pub sp: u16,
    _reserved4: u16,
    pub bx: u16,
    _reserved5: u16,
    pub dx: u16,
    _reserved6: u16,
    pub cx: u16,
    _reserved7: u16,
    pub ax: u16,
    _reserved8: u16,
}

/// 8-bit view of the byte-addressable registers (B/D/C/A families).
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct ByteRegs {
    _reserved1: u32,
    _reserved2: u32,
    _reserved3: u32,
    _reserved4: u32,
    pub bl: u8,
    pub bh: u8,
    _reserved5: u16,
    pub dl: u8,
    pub dh: u8,
    _reserved6: u16,
    pub cl: u8,
    pub ch: u8,
    _reserved7: u16,
    pub al: u8,
    pub ah: u8,
    _reserved8: u16,
}

/// The register file handed to and received from 16-bit code, with true
/// aliasing between the dword, word and byte views.
///
/// All three views are plain-old-data with every bit pattern valid, so
/// reading any view after writing any other is sound; the accessors wrap
/// the unavoidable `unsafe` union field access in one place.
#[repr(C)]
pub union RegisterSet {
    e: DwordRegs,
    x: WordRegs,
    h: ByteRegs,
}

// The transition code addresses these fields by hard offset.
const _: () = {
    assert!(size_of::<RegisterSet>() == 56);
    assert!(size_of::<DwordRegs>() == 56);
    assert!(size_of::<WordRegs>() == 32);
    assert!(size_of::<ByteRegs>() == 32);
    assert!(core::mem::offset_of!(DwordRegs, esp) == 12);
    assert!(core::mem::offset_of!(DwordRegs, eax) == 28);
    assert!(core::mem::offset_of!(DwordRegs, ds) == 32);
    assert!(core::mem::offset_of!(DwordRegs, eflags) == 40);
    assert!(core::mem::offset_of!(DwordRegs, eip) == 48);
    assert!(core::mem::offset_of!(DwordRegs, cs) == 52);
    assert!(core::mem::offset_of!(DwordRegs, ss) == 54);
};

impl RegisterSet {
    /// An all-zero register file (flags included).
    #[must_use]
    pub fn zeroed() -> Self {
        // SAFETY: the all-zero bit pattern is valid for every view.
        unsafe { core::mem::zeroed() }
    }

    /// The 32-bit register view.
    #[inline]
    #[must_use]
    pub const fn e(&self) -> &DwordRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &self.e }
    }

    /// The 32-bit register view, mutable.
    #[inline]
    #[must_use]
    pub const fn e_mut(&mut self) -> &mut DwordRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &mut self.e }
    }

    /// The 16-bit register view.
    #[inline]
    #[must_use]
    pub const fn x(&self) -> &WordRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &self.x }
    }

    /// The 16-bit register view, mutable.
    #[inline]
    #[must_use]
    pub const fn x_mut(&mut self) -> &mut WordRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &mut self.x }
    }

    /// The 8-bit register view.
    #[inline]
    #[must_use]
    pub const fn h(&self) -> &ByteRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &self.h }
    }

    /// The 8-bit register view, mutable.
    #[inline]
    #[must_use]
    pub const fn h_mut(&mut self) -> &mut ByteRegs {
        // SAFETY: all views alias plain-old-data; any bits are valid.
        unsafe { &mut self.h }
    }
}

impl Clone for RegisterSet {
    fn clone(&self) -> Self {
        *self
    }
}

impl Copy for RegisterSet {}

impl Default for RegisterSet {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for RegisterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = self.e();
        f.debug_struct("RegisterSet")
            .field("eax", &format_args!("{:#010x}", e.eax))
            .field("ebx", &format_args!("{:#010x}", e.ebx))
            .field("ecx", &format_args!("{:#010x}", e.ecx))
            .field("edx", &format_args!("{:#010x}", e.edx))
            .field("esi", &format_args!("{:#010x}", e.esi))
            .field("edi", &format_args!("{:#010x}", e.edi))
            .field("ebp", &format_args!("{:#010x}", e.ebp))
            .field("esp", &format_args!("{:#010x}", e.esp))
            .field("ds", &format_args!("{:#06x}", e.ds))
            .field("es", &format_args!("{:#06x}", e.es))
            .field("fs", &format_args!("{:#06x}", e.fs))
            .field("gs", &format_args!("{:#06x}", e.gs))
            .field("ss", &format_args!("{:#06x}", e.ss))
            .field("cs", &format_args!("{:#06x}", e.cs))
            .field("eip", &format_args!("{:#010x}", e.eip))
            .field("eflags", &format_args!("{:#010x}", e.eflags.into_bits()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_view_aliases_low_half_of_dwords() {
        let mut regs = RegisterSet::zeroed();
        regs.e_mut().eax = 0x1234_5678;
        regs.e_mut().edx = 0xdead_beef;
        assert_eq!(regs.x().ax, 0x5678);
        assert_eq!(regs.x().dx, 0xbeef);

        regs.x_mut().bx = 0xa55a;
        assert_eq!(regs.e().ebx, 0x0000_a55a);
    }

    #[test]
    fn byte_view_aliases_word_halves() {
        let mut regs = RegisterSet::zeroed();
        regs.x_mut().ax = 0x4f02;
        assert_eq!(regs.h().ah, 0x4f);
        assert_eq!(regs.h().al, 0x02);

        regs.h_mut().ch = 0x12;
        regs.h_mut().cl = 0x34;
        assert_eq!(regs.x().cx, 0x1234);
        assert_eq!(regs.e().ecx, 0x0000_1234);
    }

    #[test]
    fn high_dword_half_is_untouched_by_word_writes() {
        let mut regs = RegisterSet::zeroed();
        regs.e_mut().eax = 0xffff_ffff;
        regs.x_mut().ax = 0;
        assert_eq!(regs.e().eax, 0xffff_0000);
    }

    #[test]
    fn flags_alias_through_raw_bits() {
        let mut regs = RegisterSet::zeroed();
        regs.e_mut().eflags = Eflags::new().with_cf_carry(true).with_iopl(3);
        assert!(regs.e().eflags.cf_carry());
        assert_eq!(regs.e().eflags.iopl(), 3);
    }

    #[test]
    fn zeroed_really_is_zero() {
        let regs = RegisterSet::zeroed();
        assert_eq!(regs.e().eax, 0);
        assert_eq!(regs.e().eflags.into_bits(), 0);
        assert_eq!(regs.e().ss, 0);
    }
}
