//! The virtio-mmio transport: device discovery, the reset/negotiate
//! handshake, and the register-level operations [`crate::virtqueue`] needs
//! to bind a queue (spec.md §4.5).
//!
//! Grounded on the teacher's `MmioRegs` enum and `VirtioDisk::init`
//! (`src/virtio/mod.rs`, `src/virtio/virtio_disk.rs`), which implement
//! exactly this handshake for the legacy (version 1) transport only. This
//! module generalizes that handshake to the modern (version >= 2) register
//! set spec.md §4.5 and §9 call for ("two transport modes in one driver"),
//! and to a caller-supplied device class rather than the teacher's
//! hard-coded disk check.

use bitflags::bitflags;

use crate::error::{DriverError, DriverResult};
use crate::memlayout::{VIRTIO_MMIO_BASE, VIRTIO_MMIO_SLOTS, VIRTIO_MMIO_STRIDE};
use crate::mmio::{fence_full, read32, write32};

pub const MAGIC_VALUE: u32 = 0x7472_6976;

/// Register offsets, per spec.md §4.5.
mod reg {
    pub const MAGIC_VALUE: usize = 0x000;
    pub const VERSION: usize = 0x004;
    pub const DEVICE_ID: usize = 0x008;
    pub const VENDOR_ID: usize = 0x00c;
    pub const DEVICE_FEATURES: usize = 0x010;
    pub const DEVICE_FEATURES_SEL: usize = 0x014;
    pub const DRIVER_FEATURES: usize = 0x020;
    pub const DRIVER_FEATURES_SEL: usize = 0x024;
    pub const GUEST_PAGE_SIZE: usize = 0x028;
    pub const QUEUE_SEL: usize = 0x030;
    pub const QUEUE_NUM_MAX: usize = 0x034;
    pub const QUEUE_NUM: usize = 0x038;
    pub const QUEUE_ALIGN: usize = 0x03c;
    pub const QUEUE_PFN: usize = 0x040;
    pub const QUEUE_READY: usize = 0x044;
    pub const QUEUE_NOTIFY: usize = 0x050;
    pub const INTERRUPT_STATUS: usize = 0x060;
    pub const INTERRUPT_ACK: usize = 0x064;
    pub const STATUS: usize = 0x070;
    pub const QUEUE_DESC_LOW: usize = 0x080;
    pub const QUEUE_DESC_HIGH: usize = 0x084;
    pub const QUEUE_AVAIL_LOW: usize = 0x090;
    pub const QUEUE_AVAIL_HIGH: usize = 0x094;
    pub const QUEUE_USED_LOW: usize = 0x0a0;
    pub const QUEUE_USED_HIGH: usize = 0x0a4;
    pub const CONFIG: usize = 0x100;
}

bitflags! {
    /// STATUS register bits (spec.md §4.5 step 1-9).
    pub struct DeviceStatus: u32 {
        const ACKNOWLEDGE = 0b0001;
        const DRIVER = 0b0010;
        const FEATURES_OK = 0b1000;
        const DRIVER_OK = 0b0100;
    }
}

/// Feature bit shared by every device class in modern mode: the device
/// understands the >= 1.0 feature negotiation protocol.
pub const F_VERSION_1: u64 = 1 << 32;

/// Legacy transport (version 1), or modern (version >= 2). Spec.md §4.3/§4.5
/// describe these as the two ways the three queue addresses get published;
/// the handshake is otherwise shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportVersion {
    Legacy,
    Modern,
}

const QUEUE_READY_TIMEOUT_ITERS: u32 = 1_000_000;

/// One discovered virtio-mmio device.
#[derive(Debug, Clone, Copy)]
pub struct VirtioDevice {
    base: usize,
    version: TransportVersion,
    device_id: u32,
    vendor_id: u32,
    features: u64,
    status: u32,
    /// Index assigned during discovery; selects the device's slice of the
    /// DMA arena and disambiguates devices sharing one class.
    pub index: usize,
}

fn reg_addr(base: usize, offset: usize) -> usize {
    base + offset
}

impl VirtioDevice {
    /// Scans up to [`crate::memlayout::VIRTIO_MMIO_SLOTS`] slots at stride
    /// [`crate::memlayout::VIRTIO_MMIO_STRIDE`] starting at
    /// [`crate::memlayout::VIRTIO_MMIO_BASE`], returning the first slot
    /// whose `DEVICE_ID` matches `device_id`. A slot with bad magic, a
    /// version outside `{1, 2}`, or `DEVICE_ID == 0` (empty) is skipped,
    /// not fatal (spec.md §4.8).
    pub fn discover(device_id: u32) -> DriverResult<VirtioDevice> {
        for index in 0..VIRTIO_MMIO_SLOTS {
            let base = VIRTIO_MMIO_BASE + index * VIRTIO_MMIO_STRIDE;
            if let Some(dev) = Self::probe_slot(base, index, device_id) {
                return Ok(dev);
            }
        }
        Err(DriverError::DeviceNotFound)
    }

    /// Returns every slot matching `device_id`, capped at the scan bound.
    /// Supplements [`Self::discover`] for boards exposing more than one
    /// device of the same class (original `virtio_debug.c` logs every slot
    /// it finds, not only the first match). `out` is filled in place so a
    /// caller can pass a plain `[None; N]` array without needing a dummy
    /// `VirtioDevice` to prefill it with.
    pub fn discover_all(device_id: u32, out: &mut [Option<VirtioDevice>]) -> usize {
        let mut found = 0;
        for index in 0..VIRTIO_MMIO_SLOTS {
            if found >= out.len() {
                break;
            }
            let base = VIRTIO_MMIO_BASE + index * VIRTIO_MMIO_STRIDE;
            if let Some(dev) = Self::probe_slot(base, index, device_id) {
                out[found] = Some(dev);
                found += 1;
            }
        }
        found
    }

    /// Logs this device's discovery/negotiation state at debug level:
    /// MMIO base, device/vendor id, and the status bits left set after the
    /// handshake (original `virtio_debug.c` prints the same fields for
    /// every bound device).
    pub fn log_discovery(&self) {
        crate::log_debug!(
            "VIRTIO",
            "base={:#x} device_id={} vendor_id={:#x} status={:#x}",
            self.base(),
            self.device_id(),
            self.vendor_id(),
            self.status()
        );
    }

    fn probe_slot(base: usize, index: usize, device_id: u32) -> Option<VirtioDevice> {
        // SAFETY: `base` is one of the fixed virtio-mmio slot addresses.
        let magic = unsafe { read32(reg_addr(base, reg::MAGIC_VALUE)) };
        if magic != MAGIC_VALUE {
            return None;
        }
        // SAFETY: see above.
        let raw_version = unsafe { read32(reg_addr(base, reg::VERSION)) };
        let version = match raw_version {
            1 => TransportVersion::Legacy,
            2 => TransportVersion::Modern,
            _ => return None,
        };
        // SAFETY: see above.
        let this_id = unsafe { read32(reg_addr(base, reg::DEVICE_ID)) };
        if this_id == 0 || this_id != device_id {
            return None;
        }
        // SAFETY: see above.
        let vendor_id = unsafe { read32(reg_addr(base, reg::VENDOR_ID)) };
        Some(VirtioDevice {
            base,
            version,
            device_id: this_id,
            vendor_id,
            features: 0,
            status: 0,
            index,
        })
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn version(&self) -> TransportVersion {
        self.version
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn vendor_id(&self) -> u32 {
        self.vendor_id
    }

    pub fn features(&self) -> u64 {
        self.features
    }

    pub fn status(&self) -> u32 {
        self.status
    }

    fn read_reg(&self, offset: usize) -> u32 {
        // SAFETY: `self.base + offset` is within the device's MMIO slot.
        unsafe { read32(reg_addr(self.base, offset)) }
    }

    fn write_reg(&self, offset: usize, val: u32) {
        // SAFETY: `self.base + offset` is within the device's MMIO slot.
        unsafe { write32(reg_addr(self.base, offset), val) };
    }

    fn set_status(&mut self, status: DeviceStatus) {
        self.status = status.bits();
        self.write_reg(reg::STATUS, status.bits());
    }

    /// Runs the full reset/negotiate/drive-ok handshake (spec.md §4.5,
    /// steps 1-9), then binds `queues.len()` queues via `bind_queue`.
    /// `select_features` receives the device-advertised 64-bit feature
    /// bitmap and returns the features the driver wants to enable; for
    /// legacy devices it should mirror bits 0-31 unmodified, for modern
    /// devices it must include [`F_VERSION_1`].
    pub fn handshake(
        &mut self,
        select_features: impl FnOnce(u64) -> u64,
    ) -> DriverResult<()> {
        self.write_reg(reg::STATUS, 0);
        self.status = 0;

        self.set_status(DeviceStatus::ACKNOWLEDGE);
        self.set_status(DeviceStatus::ACKNOWLEDGE | DeviceStatus::DRIVER);

        let lo = self.read_device_features_half(0);
        let hi = self.read_device_features_half(1);
        let device_features = (lo as u64) | ((hi as u64) << 32);
        self.features = device_features;

        let driver_features = select_features(device_features);
        if self.version == TransportVersion::Modern && driver_features & F_VERSION_1 == 0 {
            return Err(DriverError::NegotiationRejected);
        }
        self.write_driver_features_half(0, driver_features as u32);
        self.write_driver_features_half(1, (driver_features >> 32) as u32);

        let mut status = DeviceStatus::ACKNOWLEDGE | DeviceStatus::DRIVER | DeviceStatus::FEATURES_OK;
        self.set_status(status);
        let readback = self.read_reg(reg::STATUS);
        if readback & DeviceStatus::FEATURES_OK.bits() == 0 {
            return Err(DriverError::NegotiationRejected);
        }

        status |= DeviceStatus::DRIVER_OK;
        self.set_status(status);
        Ok(())
    }

    fn read_device_features_half(&self, sel: u32) -> u32 {
        self.write_reg(reg::DEVICE_FEATURES_SEL, sel);
        self.read_reg(reg::DEVICE_FEATURES)
    }

    fn write_driver_features_half(&self, sel: u32, val: u32) {
        self.write_reg(reg::DRIVER_FEATURES_SEL, sel);
        self.write_reg(reg::DRIVER_FEATURES, val);
    }

    /// Selects `queue_index`, caps its size at `requested_size`, and (for
    /// the modern transport) marks it `QUEUE_READY`. Used by
    /// [`crate::virtqueue::Virtqueue::init`]; kept here because it is pure
    /// register plumbing, not virtqueue-memory bookkeeping.
    pub(crate) fn select_queue(&self, queue_index: u16) {
        self.write_reg(reg::QUEUE_SEL, queue_index as u32);
    }

    pub(crate) fn queue_num_max(&self) -> u32 {
        self.read_reg(reg::QUEUE_NUM_MAX)
    }

    pub(crate) fn set_queue_num(&self, size: u16) {
        self.write_reg(reg::QUEUE_NUM, size as u32);
    }

    pub(crate) fn set_queue_pfn(&self, pfn: u64, guest_page_size: u32) {
        self.write_reg(reg::GUEST_PAGE_SIZE, guest_page_size);
        self.write_reg(reg::QUEUE_ALIGN, 4096);
        self.write_reg(reg::QUEUE_PFN, pfn as u32);
    }

    pub(crate) fn set_queue_addresses(&self, desc: usize, avail: usize, used: usize) {
        self.write_reg(reg::QUEUE_DESC_LOW, desc as u32);
        self.write_reg(reg::QUEUE_DESC_HIGH, (desc as u64 >> 32) as u32);
        self.write_reg(reg::QUEUE_AVAIL_LOW, avail as u32);
        self.write_reg(reg::QUEUE_AVAIL_HIGH, (avail as u64 >> 32) as u32);
        self.write_reg(reg::QUEUE_USED_LOW, used as u32);
        self.write_reg(reg::QUEUE_USED_HIGH, (used as u64 >> 32) as u32);
    }

    /// Sets `QUEUE_READY` and waits (bounded) for it to read back set.
    pub(crate) fn mark_queue_ready(&self) -> DriverResult<()> {
        self.write_reg(reg::QUEUE_READY, 1);
        for _ in 0..QUEUE_READY_TIMEOUT_ITERS {
            if self.read_reg(reg::QUEUE_READY) & 1 != 0 {
                return Ok(());
            }
        }
        Err(DriverError::QueueInitFailed(
            crate::error::QueueInitFailure::QueueReadyTimeout,
        ))
    }

    /// Writes `queue_index` into `QUEUE_NOTIFY`, with the barriers spec.md
    /// §4.4/§5 require around the notify store.
    pub(crate) fn notify(&self, queue_index: u16) {
        fence_full();
        self.write_reg(reg::QUEUE_NOTIFY, queue_index as u32);
        fence_full();
    }

    /// Reads `INTERRUPT_STATUS`, acks it, and returns the raw status bits.
    /// Bit 0 = used-buffer notification, bit 1 = config-space change. A
    /// status of 0 is a spurious interrupt; the caller counts it (spec.md
    /// §4.5 "Interrupt").
    pub fn interrupt_ack(&self) -> u32 {
        let status = self.read_reg(reg::INTERRUPT_STATUS);
        self.write_reg(reg::INTERRUPT_ACK, status);
        status
    }

    /// Reads `len` bytes of the device-class configuration space starting
    /// at `CONFIG + offset`.
    pub(crate) fn read_config_u32(&self, offset: usize) -> u32 {
        self.read_reg(reg::CONFIG + offset)
    }

    pub(crate) fn read_config_u64(&self, offset: usize) -> u64 {
        let lo = self.read_config_u32(offset) as u64;
        let hi = self.read_config_u32(offset + 4) as u64;
        lo | (hi << 32)
    }
}

#[cfg(test)]
impl VirtioDevice {
    /// A harmless stub device for tests that need a `VirtioDevice` value
    /// but never touch its MMIO registers (e.g. virtqueue bookkeeping
    /// tests).
    pub(crate) fn test_stub() -> Self {
        VirtioDevice {
            base: 0,
            version: TransportVersion::Legacy,
            device_id: 0,
            vendor_id: 0,
            features: 0,
            status: 0,
            index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bits_accumulate_in_the_expected_final_value() {
        let status = DeviceStatus::ACKNOWLEDGE
            | DeviceStatus::DRIVER
            | DeviceStatus::FEATURES_OK
            | DeviceStatus::DRIVER_OK;
        assert_eq!(status.bits(), 0b1111);
    }

    #[test]
    fn version_classification() {
        fn classify(raw_version: u32) -> Option<TransportVersion> {
            match raw_version {
                1 => Some(TransportVersion::Legacy),
                2 => Some(TransportVersion::Modern),
                _ => None,
            }
        }
        assert_eq!(classify(1), Some(TransportVersion::Legacy));
        assert_eq!(classify(2), Some(TransportVersion::Modern));
        assert_eq!(classify(3), None);
        assert_eq!(classify(255), None);
        assert_eq!(classify(0), None);
    }
}
