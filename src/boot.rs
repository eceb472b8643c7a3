//! The boot path: bring up the GIC and UART, then attempt to mount the
//! FAT32 volume over the virtio block device. On any error, log it and
//! invoke the platform shutdown hook — there is no error-recovery loop
//! (spec.md §7 "User-visible behavior").
//!
//! The vector table and exception-entry assembly that calls into this are
//! out of scope here (spec.md §1); this crate exposes the single
//! `extern "C"` entry point that assembly is expected to call once in
//! supervisor/EL1 mode.

use crate::error::DriverError;
use crate::fat32::Fat32Volume;
use crate::virtio_blk::{BlockDevice, DEVICE_ID};
use crate::virtio_transport::VirtioDevice;
use crate::virtqueue::CompletionMode;

/// Logs every virtio-mmio slot offering the block device class before
/// mounting, the same "scan and log everything" diagnostic the original's
/// `virtio_debug.c` runs ahead of binding the one slot it actually uses.
fn log_virtio_blk_scan() {
    let mut slots: [Option<VirtioDevice>; 4] = [None; 4];
    let found = VirtioDevice::discover_all(DEVICE_ID, &mut slots);
    crate::log_debug!("BOOT", "virtio-blk scan found {} matching slot(s)", found);
    for slot in slots.iter().take(found).flatten() {
        slot.log_discovery();
    }
}

fn mount() -> Result<Fat32Volume, DriverError> {
    log_virtio_blk_scan();
    let block = BlockDevice::init(CompletionMode::Polling)?;
    let mut volume = Fat32Volume::new(block);
    volume.init()?;
    Ok(volume)
}

/// Entry point for the single boot CPU. Never returns.
///
/// # Safety
/// Must be called exactly once, before any interrupts are unmasked, with
/// the GIC and UART MMIO windows already identity-mapped.
#[no_mangle]
pub unsafe extern "C" fn kernel_main() -> ! {
    crate::uart::UART.init();
    crate::gic::init();

    match mount() {
        Ok(_volume) => {
            crate::log_info!("BOOT", "volume mounted");
        }
        Err(e) => {
            crate::log_error!("BOOT", "mount failed: {}", e);
        }
    }

    crate::poweroff::shutdown()
}
