//! The virtio block device: three-descriptor request chains for sector
//! reads and writes (spec.md §4.6).
//!
//! Grounded on the teacher's `VirtioDisk::rw` (`src/virtio/virtio_disk.rs`),
//! which builds the same header/data/status triple and polls the status
//! sentinel; generalized here to ride on the standalone [`crate::virtqueue`]
//! rather than baking ring management into the disk driver itself, and to
//! negotiate the device-class feature bits (`SIZE_MAX`, `SEG_MAX`,
//! `BLK_SIZE`) spec.md §4.6 names instead of accepting whatever the device
//! offers.

use core::ptr;

use crate::dma::DmaArena;
use crate::error::{DriverError, DriverResult};
use crate::memlayout::BLOCK_BUFFERS_BASE;
use crate::virtio_transport::{VirtioDevice, F_VERSION_1};
use crate::virtqueue::{desc_flags, CompletionMode, Virtqueue};
use crate::wire::{read_u64, write_u32, write_u64};

/// virtio device-id for the block device class.
pub const DEVICE_ID: u32 = 2;

pub const SECTOR_SIZE: usize = 512;

mod req_type {
    pub const IN: u32 = 0;
    pub const OUT: u32 = 1;
    #[allow(dead_code)]
    pub const FLUSH: u32 = 4;
}

mod status_code {
    pub const OK: u8 = 0;
    pub const IOERR: u8 = 1;
    pub const UNSUPP: u8 = 2;
}

const STATUS_SENTINEL: u8 = 0xff;

/// Feature bits this driver understands for the block device class
/// (spec.md §4.6).
pub mod features {
    pub const SIZE_MAX: u64 = 1 << 1;
    pub const SEG_MAX: u64 = 1 << 2;
    pub const BLK_SIZE: u64 = 1 << 6;
}

const HEADER_LEN: usize = 16;
const HEADER_ADDR: usize = BLOCK_BUFFERS_BASE;
const DATA_ADDR: usize = HEADER_ADDR + HEADER_LEN;
const STATUS_ADDR: usize = DATA_ADDR + SECTOR_SIZE;

pub struct BlockDevice {
    queue: Virtqueue,
    capacity: u64,
    size_max: u32,
    seg_max: u32,
    block_size: u32,
}

impl BlockDevice {
    /// Discovers, negotiates, and binds queue 0 of a virtio-blk device.
    pub fn init(mode: CompletionMode) -> DriverResult<Self> {
        let mut device = VirtioDevice::discover(DEVICE_ID)?;
        let version = device.version();
        device.handshake(|device_features| {
            // Legacy has no opt-in mechanism: the driver must mirror the
            // device's offered feature bits back verbatim, not mask them
            // down to the subset this driver understands
            // (examples/original_source/src/virtio/virtio_mmio.c:258-260).
            // Only the modern (>= 2) transport supports selectively
            // accepting a subset via FEATURES_OK renegotiation.
            if version == crate::virtio_transport::TransportVersion::Modern {
                (device_features & (features::SIZE_MAX | features::SEG_MAX | features::BLK_SIZE))
                    | F_VERSION_1
            } else {
                device_features
            }
        })?;

        device.log_discovery();

        let arena = DmaArena::default_arena();
        let queue = Virtqueue::init(&device, 0, &arena, mode)?;

        let capacity = device.read_config_u64(0);
        let size_max = device.read_config_u32(8);
        let seg_max = device.read_config_u32(12);
        let block_size = device.read_config_u32(20);

        let this = Self {
            queue,
            capacity,
            size_max,
            seg_max,
            block_size,
        };
        crate::log_debug!(
            "BLK",
            "capacity={} sectors size_max={} seg_max={} block_size={} queue_size={}",
            this.capacity_sectors(),
            this.size_max(),
            this.seg_max(),
            this.block_size(),
            this.queue.queue_size()
        );
        Ok(this)
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn size_max(&self) -> u32 {
        self.size_max
    }

    pub fn seg_max(&self) -> u32 {
        self.seg_max
    }

    pub fn read_sector(&mut self, sector: u64, out: &mut [u8; SECTOR_SIZE]) -> DriverResult<()> {
        if sector >= self.capacity {
            return Err(DriverError::IoError);
        }
        self.write_header(req_type::IN, sector);
        self.write_status_sentinel();

        let (d0, d1, d2) = self.alloc_chain()?;
        self.queue
            .add_descriptor(d0, HEADER_ADDR as u64, HEADER_LEN as u32, desc_flags::NEXT, d1);
        self.queue.add_descriptor(
            d1,
            DATA_ADDR as u64,
            SECTOR_SIZE as u32,
            desc_flags::WRITE | desc_flags::NEXT,
            d2,
        );
        self.queue
            .add_descriptor(d2, STATUS_ADDR as u64, 1, desc_flags::WRITE, 0);

        self.queue.submit(d0, &[(HEADER_ADDR, HEADER_LEN)])?;
        self.queue.wait_completion()?;

        crate::cache::invalidate(STATUS_ADDR, 1);
        crate::cache::invalidate(DATA_ADDR, SECTOR_SIZE);
        let status = self.read_status();
        self.check_status(status)?;

        // SAFETY: `DATA_ADDR` holds `SECTOR_SIZE` bytes the device just
        // wrote and we just invalidated.
        unsafe {
            ptr::copy_nonoverlapping(DATA_ADDR as *const u8, out.as_mut_ptr(), SECTOR_SIZE);
        }
        Ok(())
    }

    pub fn write_sector(&mut self, sector: u64, data: &[u8; SECTOR_SIZE]) -> DriverResult<()> {
        if sector >= self.capacity {
            return Err(DriverError::IoError);
        }
        self.write_header(req_type::OUT, sector);
        self.write_status_sentinel();
        // SAFETY: `DATA_ADDR` holds `SECTOR_SIZE` writable bytes this
        // driver owns exclusively.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), DATA_ADDR as *mut u8, SECTOR_SIZE);
        }

        let (d0, d1, d2) = self.alloc_chain()?;
        self.queue
            .add_descriptor(d0, HEADER_ADDR as u64, HEADER_LEN as u32, desc_flags::NEXT, d1);
        self.queue
            .add_descriptor(d1, DATA_ADDR as u64, SECTOR_SIZE as u32, desc_flags::NEXT, d2);
        self.queue
            .add_descriptor(d2, STATUS_ADDR as u64, 1, desc_flags::WRITE, 0);

        self.queue
            .submit(d0, &[(HEADER_ADDR, HEADER_LEN), (DATA_ADDR, SECTOR_SIZE)])?;
        self.queue.wait_completion()?;

        crate::cache::invalidate(STATUS_ADDR, 1);
        let status = self.read_status();
        self.check_status(status)
    }

    fn alloc_chain(&mut self) -> DriverResult<(u16, u16, u16)> {
        let d0 = self.queue.alloc_descriptor();
        let d1 = self.queue.alloc_descriptor();
        let d2 = self.queue.alloc_descriptor();
        match (d0, d1, d2) {
            (Some(d0), Some(d1), Some(d2)) => Ok((d0, d1, d2)),
            _ => {
                for d in [d0, d1, d2].into_iter().flatten() {
                    self.queue.free_descriptor(d);
                }
                Err(DriverError::QueueFull)
            }
        }
    }

    fn write_header(&self, kind: u32, sector: u64) {
        // SAFETY: `HEADER_ADDR` holds `HEADER_LEN` writable bytes this
        // driver owns exclusively.
        unsafe {
            write_u32(HEADER_ADDR, kind);
            write_u32(HEADER_ADDR + 4, 0);
            write_u64(HEADER_ADDR + 8, sector);
        }
    }

    fn write_status_sentinel(&self) {
        // SAFETY: single writable byte this driver owns exclusively.
        unsafe { ptr::write(STATUS_ADDR as *mut u8, STATUS_SENTINEL) };
    }

    fn read_status(&self) -> u8 {
        // SAFETY: single byte just invalidated by the caller.
        unsafe { ptr::read(STATUS_ADDR as *const u8) }
    }

    fn check_status(&self, status: u8) -> DriverResult<()> {
        match status {
            status_code::OK => Ok(()),
            status_code::IOERR => Err(DriverError::IoError),
            status_code::UNSUPP => Err(DriverError::IoUnsupported),
            _ => Err(DriverError::IoError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encodes_type_reserved_and_sector_little_endian() {
        let mut buf = [0u8; HEADER_LEN];
        let base = buf.as_mut_ptr() as usize;
        unsafe {
            write_u32(base, req_type::OUT);
            write_u32(base + 4, 0);
            write_u64(base + 8, 0x42);
            assert_eq!(&buf[0..4], &1u32.to_le_bytes());
            assert_eq!(read_u64(base + 8), 0x42);
        }
    }

    #[test]
    fn status_sentinel_is_distinguishable_from_every_real_code() {
        assert_ne!(STATUS_SENTINEL, status_code::OK);
        assert_ne!(STATUS_SENTINEL, status_code::IOERR);
        assert_ne!(STATUS_SENTINEL, status_code::UNSUPP);
    }
}
