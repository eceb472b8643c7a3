//! The closed set of error kinds the driver core can report.
//!
//! Every fallible operation in this crate returns `Result<T, DriverError>`.
//! None of these are retried internally; the caller decides what to do,
//! per the boundary described in the block/FAT32 modules.

use core::fmt;

/// Why a queue failed to initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueInitFailure {
    /// The device reported `QUEUE_NUM_MAX == 0` for the requested index.
    QueueMaxZero,
    /// The device never set the `QUEUE_READY` bit back after we wrote it.
    QueueReadyTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// No MMIO slot in the scanned range matched the requested device class.
    DeviceNotFound,
    /// A slot's `MAGIC_VALUE` register did not read `0x74726976`.
    BadMagic,
    /// A slot's `VERSION` register was outside `{1, 2}`.
    BadVersion,
    /// The device cleared `FEATURES_OK` after we set it.
    NegotiationRejected,
    /// Queue binding failed; see [`QueueInitFailure`].
    QueueInitFailed(QueueInitFailure),
    /// `wait_completion` exhausted its iteration bound.
    IoTimeout,
    /// The device completed the request with status `IOERR`.
    IoError,
    /// The device completed the request with status `UNSUPP`.
    IoUnsupported,
    /// The device published a descriptor id that does not head an
    /// in-flight chain. The owning queue is now `Failed`.
    ProtocolViolation,
    /// Not enough free descriptors to hold the requested chain; no
    /// descriptor-table mutation occurred (spec boundary behavior).
    QueueFull,
    /// The boot sector failed validation (bad sector size or zero
    /// `fat_size_32`).
    FsBadBootSector,
    /// A directory scan reached end-of-directory without a match.
    FsNotFound,
    /// `write_file` was asked to create a name that already exists.
    FsAlreadyExists,
    /// No free cluster was found while allocating.
    FsNoSpace,
    /// A requested read would exceed the caller's output buffer.
    FsTooLarge,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DriverError::DeviceNotFound => "no matching virtio-mmio device found",
            DriverError::BadMagic => "virtio-mmio magic mismatch",
            DriverError::BadVersion => "unsupported virtio-mmio version",
            DriverError::NegotiationRejected => "device rejected FEATURES_OK",
            DriverError::QueueInitFailed(QueueInitFailure::QueueMaxZero) => {
                "device reports queue_num_max == 0"
            }
            DriverError::QueueInitFailed(QueueInitFailure::QueueReadyTimeout) => {
                "queue_ready handshake timed out"
            }
            DriverError::IoTimeout => "virtio request did not complete in time",
            DriverError::IoError => "device reported IOERR",
            DriverError::IoUnsupported => "device reported UNSUPP",
            DriverError::ProtocolViolation => "device published an unknown descriptor id",
            DriverError::QueueFull => "not enough free descriptors for the requested chain",
            DriverError::FsBadBootSector => "FAT32 boot sector failed validation",
            DriverError::FsNotFound => "file not found in root directory",
            DriverError::FsAlreadyExists => "file already exists",
            DriverError::FsNoSpace => "no free cluster available",
            DriverError::FsTooLarge => "file exceeds destination buffer",
        };
        f.write_str(msg)
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
