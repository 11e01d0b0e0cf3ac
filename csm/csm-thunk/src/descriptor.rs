use bitfield_struct::bitfield;

/// A legacy (8-byte) GDT segment descriptor.
///
/// The base is the classic 24-bit quantity split across
/// [`base_low`](Self::base_low) and [`base_mid`](Self::base_mid) plus the
/// high byte; preparation rewrites the low/mid fields to relocate the
/// trampoline's code and data segments onto the destination buffer.
#[bitfield(u64, order = Lsb)]
pub struct SegmentDescriptor {
    /// Segment limit bits 15..0.
    pub limit_low: u16,
    /// Base address bits 15..0.
    pub base_low: u16,
    /// Base address bits 23..16.
    pub base_mid: u8,
    /// Descriptor type (code/data subtype bits).
    #[bits(4)]
    pub segment_type: u8,
    /// Descriptor class: set for code/data, clear for system descriptors.
    pub s_code_or_data: bool,
    /// Descriptor privilege level.
    #[bits(2)]
    pub dpl: u8,
    /// Segment present.
    pub present: bool,
    /// Segment limit bits 19..16.
    #[bits(4)]
    pub limit_high: u8,
    /// Available for system software.
    pub available: bool,
    /// 64-bit code segment (reserved for data segments).
    pub long_mode: bool,
    /// Default operation size (clear for 16-bit segments).
    pub default_size: bool,
    /// Granularity: limit counted in 4 KiB units when set.
    pub granularity: bool,
    /// Base address bits 31..24.
    pub base_high: u8,
}

impl SegmentDescriptor {
    /// The 24-bit base reconstructed from the low and mid fields, the way
    /// real-mode-reachable descriptors encode it.
    #[must_use]
    pub const fn base_24(self) -> u32 {
        (self.base_mid() as u32) << 16 | self.base_low() as u32
    }

    /// The decoded byte limit.
    #[must_use]
    pub const fn limit(self) -> u32 {
        let raw = (self.limit_high() as u32) << 16 | self.limit_low() as u32;
        if self.granularity() {
            (raw << 12) | 0xfff
        } else {
            raw
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The trampoline's 16-bit code segment template (flat 4 GiB limit).
    const CODE16_TEMPLATE: u64 = 0x008f_9b00_0000_ffff;

    #[test]
    fn decodes_the_code16_template() {
        let desc = SegmentDescriptor::from_bits(CODE16_TEMPLATE);
        assert!(desc.present());
        assert!(desc.s_code_or_data());
        assert_eq!(desc.segment_type(), 0xb);
        assert_eq!(desc.dpl(), 0);
        assert!(desc.granularity());
        assert_eq!(desc.limit(), 0xffff_ffff);
        assert_eq!(desc.base_24(), 0);
        assert!(!desc.long_mode());
        assert!(!desc.default_size());
    }

    #[test]
    fn relocated_base_round_trips() {
        let desc = SegmentDescriptor::from_bits(CODE16_TEMPLATE)
            .with_base_low(0x0000)
            .with_base_mid(0x02);
        assert_eq!(desc.base_24(), 0x2_0000);
    }

    #[test]
    fn clearing_granularity_yields_a_64k_limit() {
        let desc = SegmentDescriptor::from_bits(CODE16_TEMPLATE)
            .with_limit_high(0)
            .with_granularity(false);
        assert_eq!(desc.limit(), 0xffff);
    }
}
