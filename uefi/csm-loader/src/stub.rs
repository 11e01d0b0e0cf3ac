//! Staging of the legacy low stub.
//!
//! Builds the E820 table from the UEFI memory map, allocates the low stub
//! region at its fixed address, carves it into table area and thunk buffer,
//! prepares the real-mode thunk, and probes the VGA BIOS shadow window for
//! an option ROM to report the far-call target a CSM would invoke.

use csm_bioscall::{efi_offset, efi_segment};
use csm_e820::{E820Full, E820Map};
use csm_lowmem::{
    LOW_STUB_BASE, LowMemError, LowMemoryArena, PAGE_SIZE, StubLayout, VGA_BIOS_BASE, VGA_BIOS_END,
};
use csm_thunk::{RealModeThunk, ThunkAttributes, ThunkContext};
use log::{debug, info};
use thiserror::Error;
use uefi::Status;
use uefi::boot::{self, AllocateType, MemoryType};
use uefi::mem::memory_map::{MemoryMap, MemoryMapMut};

/// Size of the low stub: tables up front, a page-aligned thunk buffer with
/// its real-mode stack behind them.
const LOW_STUB_LEN: usize = 0x1_0000;

/// Option ROM images start on 2 KiB boundaries.
const ROM_SCAN_STEP: u32 = 0x800;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("UEFI memory map unavailable ({0})")]
    MemoryMap(Status),

    #[error("cannot allocate the low stub at {0:#07x}; region already claimed")]
    StubAllocation(u32),

    #[error(transparent)]
    LowMem(#[from] LowMemError),

    #[error(transparent)]
    E820(#[from] E820Full),
}

impl LoaderError {
    pub const fn status(&self) -> Status {
        match self {
            Self::MemoryMap(status) => *status,
            Self::StubAllocation(_) | Self::LowMem(_) | Self::E820(_) => Status::OUT_OF_RESOURCES,
        }
    }
}

/// Runs the whole staging flow.
pub fn stage() -> Result<(), LoaderError> {
    let e820 = build_e820()?;
    info!("E820 map built: {} entries", e820.len());

    let stub = boot::allocate_pages(
        AllocateType::Address(u64::from(LOW_STUB_BASE)),
        MemoryType::LOADER_DATA,
        LOW_STUB_LEN / PAGE_SIZE,
    )
    .map_err(|_| LoaderError::StubAllocation(LOW_STUB_BASE))?;

    let layout = StubLayout::compute(LOW_STUB_BASE, LOW_STUB_LEN, e820.as_bytes().len())?;
    debug!(
        "low stub: tables at {:#07x}+{:#x}, thunk buffer at {:#07x}+{:#x}",
        layout.table_base, layout.table_len, layout.thunk_base, layout.thunk_len
    );

    // SAFETY: the pages were just allocated at LOW_STUB_BASE, which UEFI
    // identity-maps; the arena covers only the table area in front of the
    // thunk buffer.
    let mut arena = unsafe {
        LowMemoryArena::from_raw(
            stub.as_ptr(),
            LOW_STUB_BASE,
            (layout.thunk_base - layout.table_base) as usize,
        )
    };
    let table_at = arena.reserve_filled(e820.as_bytes(), 16)?;
    info!("E820 table staged at {table_at:#07x} ({} bytes)", e820.as_bytes().len());

    // SAFETY: the thunk region sits inside the same fresh allocation,
    // disjoint from the arena's table area.
    let thunk_buffer = unsafe {
        core::slice::from_raw_parts_mut(layout.thunk_base as usize as *mut u8, layout.thunk_len)
    };
    let mut context = ThunkContext::new(thunk_buffer);
    context.prepare(
        ThunkAttributes::new()
            .with_big_real_mode(true)
            .with_disable_a20_mask_int15(true),
    );
    info!(
        "real-mode thunk ready at {:#07x}, callee stack top {:#07x}",
        context.base(),
        context.stack_base() as usize + context.stack().len()
    );

    probe_vga_option_rom();
    Ok(())
}

/// Converts the UEFI memory map into E820 records.
fn build_e820() -> Result<E820Map, LoaderError> {
    let mut mmap =
        boot::memory_map(MemoryType::LOADER_DATA).map_err(|err| LoaderError::MemoryMap(err.status()))?;
    // Coalescing assumes ascending addresses.
    mmap.sort();

    let mut map = E820Map::new();
    for desc in mmap.entries() {
        map.push_descriptor(desc)?;
    }
    Ok(map)
}

/// Scans the VGA BIOS shadow window for a 0x55AA option ROM signature and
/// reports the initialization entry a CSM would far-call. Actually issuing
/// the call needs the legacy region unlocked and shadowed, which is the
/// chipset layer's job.
fn probe_vga_option_rom() {
    let mut base = VGA_BIOS_BASE;
    while base < VGA_BIOS_END {
        // SAFETY: the shadow window is identity mapped under UEFI; reads
        // of unshadowed addresses return open-bus garbage, never fault.
        let header =
            unsafe { core::ptr::read_volatile(base as usize as *const [u8; 3]) };
        if header[0] == 0x55 && header[1] == 0xaa {
            let entry = base + 3;
            info!(
                "VGA option ROM at {base:#07x} ({} KiB), init entry {:04x}:{:04x}",
                u32::from(header[2]) / 2,
                efi_segment(entry),
                efi_offset(entry),
            );
            return;
        }
        base += ROM_SCAN_STEP;
    }
    info!("no option ROM signature in the VGA shadow window");
}
