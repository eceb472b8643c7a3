//! The generic timer's physical counter, used as the monotonic tick source
//! for every bounded wait loop in [`crate::virtqueue`] (spec.md §5: "every
//! wait loop carries a fixed iteration bound"; spec.md §6 names "current
//! time in architectural ticks" as a consumed external boundary
//! capability). Out of scope per spec.md §1 ("timer driver ... treated as
//! external collaborators") beyond this read-only counter access.
//!
//! Grounded on the teacher's `arch/arm/timer.rs`, which reads the same
//! `CNTFRQ_EL0`/`CNTPCT_EL0` pair; this reimplementation drops the
//! `spin_for`/`TimeManager` trait machinery (no scheduler to block here)
//! down to a free-running tick counter plus the micros/ticks conversions
//! the wait loops need.

#[cfg(target_arch = "aarch64")]
use cortex_a::{asm::barrier, registers::*};
#[cfg(target_arch = "aarch64")]
use tock_registers::interfaces::Readable;

/// The physical counter's current value, in timer ticks. Monotonic for the
/// lifetime of the machine; never wraps within any run this core cares
/// about.
#[cfg(target_arch = "aarch64")]
pub fn ticks() -> u64 {
    // SAFETY: ISB prevents the counter read from being reordered ahead of
    // whatever produced the need for a fresh timestamp.
    unsafe { barrier::isb(barrier::SY) };
    CNTPCT_EL0.get()
}

/// Ticks per second of [`ticks`].
#[cfg(target_arch = "aarch64")]
pub fn frequency() -> u64 {
    CNTFRQ_EL0.get()
}

#[cfg(not(target_arch = "aarch64"))]
pub fn ticks() -> u64 {
    0
}

#[cfg(not(target_arch = "aarch64"))]
pub fn frequency() -> u64 {
    1_000_000
}

/// Converts a tick delta into whole microseconds, saturating rather than
/// panicking on overflow since this is only used for timeout bookkeeping.
pub fn ticks_to_micros(delta: u64) -> u64 {
    let freq = frequency().max(1);
    delta.saturating_mul(1_000_000) / freq
}

/// Converts a microsecond duration into a tick count, the inverse of
/// [`ticks_to_micros`]; used to turn a wall-clock wait bound into a
/// deadline against [`ticks`].
pub fn micros_to_ticks(micros: u64) -> u64 {
    let freq = frequency().max(1);
    micros.saturating_mul(freq) / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_and_ticks_round_trip_at_a_nominal_frequency() {
        let freq = frequency();
        let ticks = micros_to_ticks(1_000_000);
        assert_eq!(ticks, freq);
        assert_eq!(ticks_to_micros(ticks), 1_000_000);
    }
}
