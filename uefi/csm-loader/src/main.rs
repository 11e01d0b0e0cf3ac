//! # UEFI CSM Staging Loader
//!
//! UEFI application that stands up the real-mode thunk engine on a live
//! machine: it builds the E820 memory table from the UEFI memory map,
//! claims the classic low-stub region below 1 MiB, stages the table and a
//! prepared thunk buffer there, and probes the VGA BIOS shadow window for
//! an option ROM entry point.
//!
//! The loader stops short of actually running 16-bit code: unlocking and
//! shadowing the legacy region is chipset work that lives outside this
//! repository. Everything it stages is exactly what that layer would
//! consume next.
//!
//! The binary is UEFI-only; on other targets it compiles to an empty stub
//! so the workspace builds and tests everywhere.

#![cfg_attr(all(target_os = "uefi", not(test)), no_std)]
#![cfg_attr(target_os = "uefi", no_main)]
#![allow(unsafe_code)]

#[cfg(target_os = "uefi")]
extern crate alloc;

#[cfg(target_os = "uefi")]
mod logger;
#[cfg(target_os = "uefi")]
mod memory;
#[cfg(target_os = "uefi")]
mod stub;

#[cfg(target_os = "uefi")]
mod entry {
    use crate::logger::UefiLogger;
    use crate::stub;
    use log::{LevelFilter, error, info};
    use uefi::prelude::*;

    #[entry]
    fn efi_main() -> Status {
        if uefi::helpers::init().is_err() {
            return Status::UNSUPPORTED;
        }

        let logger = UefiLogger::new(LevelFilter::Debug);
        if logger.init().is_err() {
            return Status::UNSUPPORTED;
        }

        info!("CSM staging loader starting");
        match stub::stage() {
            Ok(()) => {
                info!("staging complete");
                Status::SUCCESS
            }
            Err(err) => {
                error!("staging failed: {err}");
                err.status()
            }
        }
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        error!("loader panic: {info}");
        loop {
            core::hint::spin_loop();
        }
    }
}

#[cfg(not(target_os = "uefi"))]
fn main() {}
