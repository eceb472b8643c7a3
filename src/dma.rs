//! The static DMA arena: a fixed high-address window carved into
//! per-queue 64 KiB slots (spec.md §4.3, §9 design note).
//!
//! The original hard-codes the arena's physical base into the driver; this
//! reimplementation factors it as a component parameter per the §9 design
//! note ("a `DmaArena` configured at system start with a base physical
//! address and a slot size, producing per-queue handles that expose the
//! three addresses"). No dynamic allocator is used or needed — every
//! queue's slot is a fixed offset from the arena base.

use crate::memlayout::{DMA_ARENA_BASE, DMA_ARENA_MAX_QUEUES, DMA_ARENA_SLOT_SIZE};

/// Alignment the modern (`version >= 2`) transport only strictly requires,
/// but which this core applies uniformly inside a slot for simplicity
/// (spec.md §4.3).
const MODERN_ALIGN: usize = 16;

/// 4 KiB, the legacy transport's mandatory `QUEUE_ALIGN`.
const LEGACY_PAGE: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct DmaArena {
    base: usize,
    slot_size: usize,
}

/// The three addresses a bound virtqueue needs, laid out within one arena
/// slot.
#[derive(Debug, Clone, Copy)]
pub struct QueueRegions {
    pub desc: usize,
    pub avail: usize,
    pub used: usize,
}

impl DmaArena {
    /// Creates an arena with `base` as its first slot's address. `base`
    /// must be identity-mapped, and the memory must either be non-cached
    /// or have its uses paired with [`crate::cache`] maintenance (this
    /// core always does the latter).
    pub fn new(base: usize, slot_size: usize) -> Self {
        Self { base, slot_size }
    }

    /// The arena configured for the board addresses in [`crate::memlayout`].
    /// Debug-asserts that the arena's slots and the block driver's reserved
    /// request/sector buffers (both compile-time constants on this board)
    /// don't overlap (spec.md §9 design note).
    pub fn default_arena() -> Self {
        debug_assert!(
            crate::memlayout::regions_disjoint(DMA_ARENA_MAX_QUEUES),
            "DMA arena slots overlap the block driver's reserved buffers"
        );
        Self::new(DMA_ARENA_BASE, DMA_ARENA_SLOT_SIZE)
    }

    /// Base address of `queue_id`'s slot: `base + queue_id * slot_size`.
    pub const fn slot_base(&self, queue_id: usize) -> usize {
        self.base + queue_id * self.slot_size
    }

    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Lays out the legacy (version 1) region: descriptor table at offset
    /// 0, available ring immediately after (`6 + 2 * queue_size` bytes),
    /// used ring at the next 4 KiB boundary above the available ring.
    /// Returns the three addresses plus the page-frame-number the driver
    /// reports to the device (the whole layout lives in one
    /// `LEGACY_PAGE`-aligned region, per spec.md §4.3).
    pub fn layout_legacy(&self, queue_id: usize, queue_size: u16) -> (QueueRegions, u64) {
        let slot = self.slot_base(queue_id);
        let page_aligned = align_up(slot, LEGACY_PAGE);
        let desc = page_aligned;
        let desc_bytes = 16 * queue_size as usize;
        let avail = desc + desc_bytes;
        let avail_bytes = 6 + 2 * queue_size as usize;
        let used = align_up(avail + avail_bytes, LEGACY_PAGE);
        let pfn = (page_aligned / LEGACY_PAGE) as u64;
        (QueueRegions { desc, avail, used }, pfn)
    }

    /// Lays out the modern (version >= 2) region: three independently
    /// published regions, each aligned to 16 bytes within the slot for
    /// simplicity (naturally only 16/2/4-byte alignment is required).
    pub fn layout_modern(&self, queue_id: usize, queue_size: u16) -> QueueRegions {
        let slot = self.slot_base(queue_id);
        let desc = align_up(slot, MODERN_ALIGN);
        let desc_bytes = 16 * queue_size as usize;
        let avail = align_up(desc + desc_bytes, MODERN_ALIGN);
        let avail_bytes = 6 + 2 * queue_size as usize;
        let used = align_up(avail + avail_bytes, MODERN_ALIGN);
        QueueRegions { desc, avail, used }
    }
}

const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_strided_by_slot_size() {
        let arena = DmaArena::new(0x1000_0000, 0x1_0000);
        assert_eq!(arena.slot_base(0), 0x1000_0000);
        assert_eq!(arena.slot_base(1), 0x1001_0000);
        assert_eq!(arena.slot_base(3), 0x1003_0000);
    }

    #[test]
    fn legacy_layout_respects_page_alignment_and_ring_sizes() {
        let arena = DmaArena::new(0x1000_0000, 0x1_0000);
        let (regions, pfn) = arena.layout_legacy(0, 8);
        assert_eq!(regions.desc % LEGACY_PAGE, 0);
        assert_eq!(regions.avail, regions.desc + 16 * 8);
        assert!(regions.used >= regions.avail + 6 + 2 * 8);
        assert_eq!(regions.used % LEGACY_PAGE, 0);
        assert_eq!(pfn, (regions.desc / LEGACY_PAGE) as u64);
    }

    #[test]
    fn modern_layout_is_naturally_aligned() {
        let arena = DmaArena::new(0x2000_0000, 0x1_0000);
        let regions = arena.layout_modern(2, 16);
        assert_eq!(regions.desc % MODERN_ALIGN, 0);
        assert_eq!(regions.avail % MODERN_ALIGN, 0);
        assert_eq!(regions.used % MODERN_ALIGN, 0);
        assert!(regions.avail >= regions.desc + 16 * 16);
        assert!(regions.used >= regions.avail + 6 + 2 * 16);
    }

    #[test]
    fn block_buffers_and_arena_slots_never_overlap() {
        assert!(crate::memlayout::regions_disjoint(16));
    }
}
