use bitfield_struct::bitfield;

/// Behavior selectors for a prepared trampoline, written verbatim into the
/// image's attribute patch slot for the 16-bit code to inspect.
#[bitfield(u32, order = Lsb)]
pub struct ThunkAttributes {
    /// Enter the callee in big real mode: the 16-bit code and data segments
    /// keep 4 GiB flat limits, permitting 32-bit offsets while the CPU
    /// otherwise behaves as in real mode. Without this, both segments carry
    /// the architectural 64 KiB limit.
    pub big_real_mode: bool, // 0

    /// After the callee returns, undo an A20 mask it may have enabled by
    /// calling the INT 15h AX=2401h service, falling back to the 8042
    /// keyboard controller if the service fails.
    ///
    /// Mutually exclusive with
    /// [`disable_a20_mask_kbd_ctrl`](Self::disable_a20_mask_kbd_ctrl).
    pub disable_a20_mask_int15: bool, // 1

    /// After the callee returns, undo an A20 mask by programming the 8042
    /// keyboard controller directly.
    ///
    /// Mutually exclusive with
    /// [`disable_a20_mask_int15`](Self::disable_a20_mask_int15).
    pub disable_a20_mask_kbd_ctrl: bool, // 2

    /// Reserved.
    #[bits(29, default = 0)]
    _reserved: u32,
}

impl ThunkAttributes {
    /// Whether this attribute combination is legal. The two A20 strategies
    /// are mutually exclusive; requesting both is a contract violation.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !(self.disable_a20_mask_int15() && self.disable_a20_mask_kbd_ctrl())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_the_patch_slot_encoding() {
        assert_eq!(ThunkAttributes::new().with_big_real_mode(true).into_bits(), 0x1);
        assert_eq!(
            ThunkAttributes::new().with_disable_a20_mask_int15(true).into_bits(),
            0x2
        );
        assert_eq!(
            ThunkAttributes::new()
                .with_disable_a20_mask_kbd_ctrl(true)
                .into_bits(),
            0x4
        );
    }

    #[test]
    fn conflicting_a20_strategies_are_invalid() {
        let attrs = ThunkAttributes::new()
            .with_disable_a20_mask_int15(true)
            .with_disable_a20_mask_kbd_ctrl(true);
        assert!(!attrs.is_valid());
        assert!(ThunkAttributes::new().is_valid());
        assert!(
            ThunkAttributes::new()
                .with_big_real_mode(true)
                .with_disable_a20_mask_int15(true)
                .is_valid()
        );
    }
}
