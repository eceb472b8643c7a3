//! The interrupt-state record shared between an IRQ handler and the
//! foreground wait routine (spec.md §3 "Interrupt-state record", §5
//! "Interrupt discipline").
//!
//! The handler's job is constant-time: read `INTERRUPT_STATUS`, write
//! `INTERRUPT_ACK`, set the `received` flag, bump a counter. No ring
//! manipulation happens in interrupt context; the foreground drains the
//! used ring when it observes `received`. Grounded on the teacher's
//! `VirtioDisk::intr` (`src/virtio/virtio_disk.rs`), which does exactly
//! this ack-then-flag sequence, generalized from "wake one sleeping
//! thread" (this core has no scheduler) to "set a flag the polling wait
//! loop can observe".

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::virtio_transport::VirtioDevice;

/// Declared with atomics (not a plain `bool`/`u32`) so reordering across the
/// handler/foreground boundary cannot hide an update from either side, per
/// spec.md §5's requirement that these fields be treated as volatile.
#[derive(Debug, Default)]
pub struct InterruptState {
    received: AtomicBool,
    last_status: AtomicU32,
    received_count: AtomicU32,
    spurious_count: AtomicU32,
}

impl InterruptState {
    pub const fn new() -> Self {
        Self {
            received: AtomicBool::new(false),
            last_status: AtomicU32::new(0),
            received_count: AtomicU32::new(0),
            spurious_count: AtomicU32::new(0),
        }
    }

    /// The IRQ handler body: ack the device, record status, set the flag.
    /// Must be the only thing that runs in interrupt context for this
    /// device (spec.md §5).
    pub fn handle(&self, device: &VirtioDevice) {
        let status = device.interrupt_ack();
        self.last_status.store(status, Ordering::Release);
        if status == 0 {
            self.spurious_count.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.received_count.fetch_add(1, Ordering::Relaxed);
        self.received.store(true, Ordering::Release);
    }

    /// Consumes and clears the `received` flag; `true` iff an interrupt
    /// arrived since the last call.
    pub fn take_received(&self) -> bool {
        self.received.swap(false, Ordering::AcqRel)
    }

    pub fn last_status(&self) -> u32 {
        self.last_status.load(Ordering::Acquire)
    }

    /// `(received_count, spurious_count)`, supplementing spec.md §3's
    /// cumulative count field with the spurious-interrupt tally the
    /// original's `virtio_debug.c` also tracks.
    pub fn stats(&self) -> (u32, u32) {
        (
            self.received_count.load(Ordering::Relaxed),
            self.spurious_count.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_received_clears_the_flag() {
        let state = InterruptState::new();
        state.received.store(true, Ordering::Release);
        assert!(state.take_received());
        assert!(!state.take_received());
    }

    #[test]
    fn stats_start_at_zero() {
        let state = InterruptState::new();
        assert_eq!(state.stats(), (0, 0));
    }
}
