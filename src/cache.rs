//! DMA cache maintenance over byte ranges.
//!
//! The DMA arena ([`crate::dma`]) is ordinary cached memory, not an
//! uncached mapping, so every handoff across the CPU/device boundary needs
//! explicit maintenance (spec.md §4.2, §4.3). Aligns the requested range
//! outward to the architectural cache line, assumed 64 bytes as spec.md
//! mandates, then walks it one line at a time issuing the point-of-coherency
//! primitive, and finishes with [`crate::mmio::fence_full`] so the
//! maintenance is visible before the caller proceeds (the ordering rule in
//! spec.md §5: "clean before handing a buffer to the device; invalidate
//! after completion, before consuming device-written bytes").

use crate::mmio::fence_full;

/// Cache line size assumed throughout this core (spec.md §4.2).
pub const CACHE_LINE: usize = 64;

fn aligned_range(start: usize, len: usize) -> (usize, usize) {
    let aligned_start = start & !(CACHE_LINE - 1);
    let end = start + len;
    let aligned_end = (end + CACHE_LINE - 1) & !(CACHE_LINE - 1);
    (aligned_start, aligned_end)
}

/// Ensures CPU-written data in `[start, start+len)` is visible to a DMA
/// reader. Call before handing a buffer to the device.
pub fn clean(start: usize, len: usize) {
    let (aligned_start, aligned_end) = aligned_range(start, len);
    let mut addr = aligned_start;
    while addr < aligned_end {
        dc_cvac(addr);
        addr += CACHE_LINE;
    }
    fence_full();
}

/// Ensures the CPU re-reads memory written by a DMA producer in
/// `[start, start+len)`. Call after completion, before consuming
/// device-written bytes.
pub fn invalidate(start: usize, len: usize) {
    let (aligned_start, aligned_end) = aligned_range(start, len);
    let mut addr = aligned_start;
    while addr < aligned_end {
        dc_ivac(addr);
        addr += CACHE_LINE;
    }
    fence_full();
}

/// Clean and invalidate in one pass. May substitute for a clean/invalidate
/// pair at a single handoff point, per spec.md §4.2.
pub fn clean_and_invalidate(start: usize, len: usize) {
    let (aligned_start, aligned_end) = aligned_range(start, len);
    let mut addr = aligned_start;
    while addr < aligned_end {
        dc_civac(addr);
        addr += CACHE_LINE;
    }
    fence_full();
}

#[cfg(target_arch = "aarch64")]
fn dc_cvac(addr: usize) {
    // SAFETY: `dc cvac` only touches the cache, never memory contents.
    unsafe { core::arch::asm!("dc cvac, {0}", in(reg) addr, options(nostack, preserves_flags)) };
}

#[cfg(target_arch = "aarch64")]
fn dc_ivac(addr: usize) {
    // SAFETY: `dc ivac` only touches the cache; callers invalidate only
    // ranges they are about to re-read, never ranges with a pending CPU
    // write they care about.
    unsafe { core::arch::asm!("dc ivac, {0}", in(reg) addr, options(nostack, preserves_flags)) };
}

#[cfg(target_arch = "aarch64")]
fn dc_civac(addr: usize) {
    // SAFETY: `dc civac` only touches the cache.
    unsafe { core::arch::asm!("dc civac, {0}", in(reg) addr, options(nostack, preserves_flags)) };
}

#[cfg(not(target_arch = "aarch64"))]
fn dc_cvac(_addr: usize) {}
#[cfg(not(target_arch = "aarch64"))]
fn dc_ivac(_addr: usize) {}
#[cfg(not(target_arch = "aarch64"))]
fn dc_civac(_addr: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_outward_to_the_cache_line() {
        assert_eq!(aligned_range(1, 1), (0, CACHE_LINE));
        assert_eq!(aligned_range(0, CACHE_LINE), (0, CACHE_LINE));
        assert_eq!(aligned_range(CACHE_LINE - 1, 2), (0, 2 * CACHE_LINE));
        assert_eq!(aligned_range(128, 512), (128, 128 + 512));
    }
}
