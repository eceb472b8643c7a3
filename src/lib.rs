//! A minimal bare-metal runtime for a 64-bit ARM `virt` machine: GIC
//! interrupt plumbing, a virtio-mmio block device, and a FAT32 volume
//! read/write layer on top.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

mod arm;
mod boot;
mod cache;
mod dma;
mod error;
mod fat32;
mod gic;
mod interrupt;
mod log;
mod memlayout;
mod mmio;
mod panic;
mod poweroff;
mod timer;
mod uart;
mod virtio_blk;
mod virtio_transport;
mod virtqueue;
mod wire;
