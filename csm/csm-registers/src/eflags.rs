use bitfield_struct::bitfield;

/// Architectural EFLAGS model as stored in a [`RegisterSet`](crate::RegisterSet).
///
/// The low 32 bits are the architectural flags word; the upper 32 bits are
/// reserved and only exist because the transfer code pushes and pops a
/// natural machine word around the mode switch.
///
/// Architecturally fixed bits are modeled as private defaulted fields so
/// they cannot be changed through the typed accessors; raw images coming
/// back from a callee are reconstructed with [`Eflags::from_bits`] and keep
/// whatever the hardware left in them.
#[bitfield(u64, order = Lsb)]
pub struct Eflags {
    /// Carry Flag — the legacy calling convention's failure signal.
    pub cf_carry: bool, // 0

    /// Always 1.
    #[bits(default = true)]
    _always1: bool, // 1

    /// Parity Flag
    pub pf_parity: bool, // 2

    /// Reserved (always 0)
    #[bits(default = false)]
    _rsvd3: bool, // 3

    /// Adjust Flag
    pub af_adjust: bool, // 4

    /// Reserved (always 0)
    #[bits(default = false)]
    _rsvd5: bool, // 5

    /// Zero Flag
    pub zf_zero: bool, // 6

    /// Sign Flag
    pub sf_sign: bool, // 7

    /// Trap Flag
    pub tf_trap: bool, // 8

    /// Interrupt Enable Flag — whether the callee runs with maskable
    /// interrupts enabled.
    pub if_interrupt_enable: bool, // 9

    /// Direction Flag
    pub df_direction: bool, // 10

    /// Overflow Flag
    pub of_overflow: bool, // 11

    /// I/O Privilege Level (2 bits); seeded to 3 for BIOS-style calls.
    #[bits(2)]
    pub iopl: u8, // 12–13

    /// Nested Task
    pub nt_nested: bool, // 14

    /// Reserved (always 0)
    #[bits(default = false)]
    _rsvd15: bool, // 15

    /// Resume Flag
    pub rf_resume: bool, // 16

    /// Virtual 8086 mode
    pub vm_virtual_8086: bool, // 17

    /// Alignment Check
    pub ac_alignment_check: bool, // 18

    /// Virtual Interrupt Flag
    pub vif_virtual_interrupt: bool, // 19

    /// Virtual Interrupt Pending
    pub vip_virtual_interrupt_pending: bool, // 20

    /// ID Flag: allows toggling CPUID.
    pub id_cpuid: bool, // 21

    /// Reserved 22–63 (all zero)
    #[bits(42, default = 0)]
    _reserved_rest: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_one_bit_is_set_by_default() {
        let flags = Eflags::new();
        assert_eq!(flags.into_bits() & 0b10, 0b10);
    }

    #[test]
    fn carry_is_bit_zero() {
        let flags = Eflags::new().with_cf_carry(true);
        assert_eq!(flags.into_bits() & 1, 1);
        assert!(Eflags::from_bits(0x1).cf_carry());
        assert!(!Eflags::from_bits(0x2).cf_carry());
    }

    #[test]
    fn iopl_occupies_bits_12_and_13() {
        let flags = Eflags::new().with_iopl(3);
        assert_eq!(flags.into_bits() & 0x3000, 0x3000);
    }

    #[test]
    fn interrupt_enable_is_bit_nine() {
        let flags = Eflags::new().with_if_interrupt_enable(true);
        assert_eq!(flags.into_bits() & 0x200, 0x200);
    }
}
