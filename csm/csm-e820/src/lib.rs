//! INT 15h E820 memory map construction from UEFI memory descriptors.
//!
//! Legacy code learns the memory layout through the E820 interface: a flat
//! table of `(base, length, type)` records. This crate converts UEFI memory
//! descriptors into E820 types, coalesces adjacent same-type regions, and
//! renders the table in the exact binary layout 16-bit code expects so it
//! can be staged into low memory.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

use thiserror::Error;
use uefi::boot::MemoryType;
use uefi::mem::memory_map::MemoryDescriptor;

/// The classic E820 region types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum E820Type {
    /// Usable RAM.
    Ram = 1,
    /// Reserved, not for OS use.
    Reserved = 2,
    /// ACPI tables, reclaimable once parsed.
    Acpi = 3,
    /// ACPI non-volatile storage.
    Nvs = 4,
    /// Known-bad memory.
    Unusable = 5,
}

impl E820Type {
    /// Maps a UEFI memory type onto the E820 vocabulary.
    ///
    /// Only conventional memory is reported as usable RAM. Loader and
    /// boot-services regions stay reserved: the table is built while boot
    /// services are still live, and those regions hold the staged tables
    /// and the thunk itself. Runtime services, MMIO and everything
    /// unrecognized are reserved as well.
    #[must_use]
    pub fn from_uefi(ty: MemoryType) -> Self {
        match ty {
            MemoryType::CONVENTIONAL => Self::Ram,
            MemoryType::ACPI_RECLAIM => Self::Acpi,
            MemoryType::ACPI_NON_VOLATILE => Self::Nvs,
            MemoryType::UNUSABLE => Self::Unusable,
            _ => Self::Reserved,
        }
    }
}

/// One E820 record in the binary layout legacy code expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, packed)]
pub struct E820Entry {
    pub addr: u64,
    pub size: u64,
    pub ty: u32,
}

const _: () = assert!(size_of::<E820Entry>() == 20);

/// More than any firmware produces after coalescing.
pub const E820_MAX_ENTRIES: usize = 128;

/// The table is full; the map cannot represent the machine.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("e820 map full ({E820_MAX_ENTRIES} entries)")]
pub struct E820Full;

/// Fixed-capacity E820 table builder.
///
/// Regions must arrive in ascending address order, the way UEFI memory
/// maps are sorted; adjacent regions of the same type merge into one
/// record.
pub struct E820Map {
    entries: [E820Entry; E820_MAX_ENTRIES],
    len: usize,
}

impl E820Map {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [E820Entry {
                addr: 0,
                size: 0,
                ty: 0,
            }; E820_MAX_ENTRIES],
            len: 0,
        }
    }

    /// Appends a region, dropping zero-length ones and coalescing with the
    /// previous record when the two abut and share a type.
    ///
    /// # Errors
    ///
    /// Fails with [`E820Full`] when a new record is needed and the table is
    /// at capacity.
    pub fn push(&mut self, addr: u64, size: u64, ty: E820Type) -> Result<(), E820Full> {
        if size == 0 {
            return Ok(());
        }
        if let Some(last) = self.entries[..self.len].last_mut() {
            if last.ty == ty as u32 && last.addr + last.size == addr {
                last.size += size;
                return Ok(());
            }
        }
        if self.len == E820_MAX_ENTRIES {
            log::warn!("e820 map full, cannot record {addr:#x}+{size:#x} ({ty:?})");
            return Err(E820Full);
        }
        self.entries[self.len] = E820Entry {
            addr,
            size,
            ty: ty as u32,
        };
        self.len += 1;
        Ok(())
    }

    /// Appends the region a UEFI memory descriptor covers.
    ///
    /// # Errors
    ///
    /// Same conditions as [`push`](Self::push).
    pub fn push_descriptor(&mut self, desc: &MemoryDescriptor) -> Result<(), E820Full> {
        let size = desc.page_count * uefi::boot::PAGE_SIZE as u64;
        self.push(desc.phys_start, size, E820Type::from_uefi(desc.ty))
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The built records.
    #[must_use]
    pub fn entries(&self) -> &[E820Entry] {
        &self.entries[..self.len]
    }

    /// The table in its wire layout, ready to stage into low memory.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: E820Entry is repr(C, packed) plain-old-data, so the
        // prefix of the entry array reinterprets losslessly as bytes.
        unsafe {
            core::slice::from_raw_parts(
                self.entries.as_ptr().cast::<u8>(),
                self.len * size_of::<E820Entry>(),
            )
        }
    }
}

impl Default for E820Map {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_the_usual_uefi_types() {
        assert_eq!(E820Type::from_uefi(MemoryType::CONVENTIONAL), E820Type::Ram);
        assert_eq!(E820Type::from_uefi(MemoryType::ACPI_RECLAIM), E820Type::Acpi);
        assert_eq!(E820Type::from_uefi(MemoryType::ACPI_NON_VOLATILE), E820Type::Nvs);
        assert_eq!(E820Type::from_uefi(MemoryType::UNUSABLE), E820Type::Unusable);
        assert_eq!(E820Type::from_uefi(MemoryType::MMIO), E820Type::Reserved);
        assert_eq!(
            E820Type::from_uefi(MemoryType::RUNTIME_SERVICES_CODE),
            E820Type::Reserved
        );
    }

    #[test]
    fn boot_time_regions_stay_reserved() {
        // The map is captured while boot services are live; loader and
        // boot-services regions hold the staged tables and the thunk.
        for ty in [
            MemoryType::LOADER_CODE,
            MemoryType::LOADER_DATA,
            MemoryType::BOOT_SERVICES_CODE,
            MemoryType::BOOT_SERVICES_DATA,
        ] {
            assert_eq!(E820Type::from_uefi(ty), E820Type::Reserved);
        }
    }

    #[test]
    fn zero_length_regions_are_dropped() {
        let mut map = E820Map::new();
        map.push(0x1000, 0, E820Type::Ram).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn adjacent_same_type_regions_coalesce() {
        let mut map = E820Map::new();
        map.push(0, 0x9_f000, E820Type::Ram).unwrap();
        map.push(0x9_f000, 0x1000, E820Type::Ram).unwrap();
        map.push(0xa_0000, 0x6_0000, E820Type::Reserved).unwrap();
        map.push(0x10_0000, 0x100_0000, E820Type::Ram).unwrap();
        map.push(0x110_0000, 0x10_0000, E820Type::Reserved).unwrap();

        let entries = map.entries();
        assert_eq!(entries.len(), 4);
        assert_eq!({ entries[0].size }, 0xa_0000);
        assert_eq!({ entries[1].ty }, E820Type::Reserved as u32);
        assert_eq!({ entries[2].addr }, 0x10_0000);
    }

    #[test]
    fn gaps_and_type_changes_start_new_records() {
        let mut map = E820Map::new();
        map.push(0, 0x1000, E820Type::Ram).unwrap();
        // Same type but not adjacent.
        map.push(0x2000, 0x1000, E820Type::Ram).unwrap();
        // Adjacent but different type.
        map.push(0x3000, 0x1000, E820Type::Acpi).unwrap();
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn capacity_overflow_is_a_recoverable_error() {
        let mut map = E820Map::new();
        for i in 0..E820_MAX_ENTRIES {
            // Alternate types so nothing coalesces.
            let ty = if i % 2 == 0 { E820Type::Ram } else { E820Type::Reserved };
            map.push(i as u64 * 0x1000, 0x1000, ty).unwrap();
        }
        assert_eq!(map.push(0x1000_0000, 0x1000, E820Type::Ram), Err(E820Full));
        assert_eq!(map.len(), E820_MAX_ENTRIES);
    }

    #[test]
    fn wire_layout_is_packed_records() {
        let mut map = E820Map::new();
        map.push(0x10_0000, 0x20_0000, E820Type::Ram).unwrap();
        map.push(0xfec0_0000, 0x1000, E820Type::Reserved).unwrap();

        let bytes = map.as_bytes();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[0..8], &0x10_0000u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &0x20_0000u64.to_le_bytes());
        assert_eq!(&bytes[16..20], &1u32.to_le_bytes());
        assert_eq!(&bytes[20..28], &0xfec0_0000u64.to_le_bytes());
    }
}
