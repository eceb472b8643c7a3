//! The Arm Generic Interrupt Controller (GICv2 distributor + CPU
//! interface). Out of scope per spec.md §1 ("Generic interrupt controller
//! programming ... treated as external collaborators"); kept minimal here
//! only so the core's `irq_register`/`irq_enable` boundary has something
//! real underneath it when this crate is booted standalone.
//!
//! Grounded on the teacher's `arch/arm/intr.rs`, which implements the same
//! distributor/CPU-interface register layout for the qemu `virt` GIC. That
//! file preserves a "suspicious bit 9" written to the CPU interface control
//! register with an admitted "TODO: check correctness" — spec.md §9 asks
//! that this be flagged, not silently dropped or silently fixed. It is not
//! reproduced here because this reimplementation only ever writes the
//! documented `ENABLE` bit to `GICC_CTLR`; the bit-9 write in the original
//! has no documented purpose and was not carried forward.

use core::ptr;

use crate::memlayout::GIC_BASE;

const GICD_CTLR: usize = GIC_BASE;
const GICD_ISENABLER: usize = GIC_BASE + 0x0100;
const GICD_ICPENDR: usize = GIC_BASE + 0x0280;
const GICD_IPRIORITYR: usize = GIC_BASE + 0x0400;
const GICD_ICFGR: usize = GIC_BASE + 0x0c00;

const GICC_BASE: usize = GIC_BASE + 0x10000;
const GICC_CTLR: usize = GICC_BASE;
const GICC_PMR: usize = GICC_BASE + 0x0004;
const GICC_IAR: usize = GICC_BASE + 0x000c;
const GICC_EOIR: usize = GICC_BASE + 0x0010;

const GICD_CTLR_ENABLE: u32 = 1;
const GICC_CTLR_ENABLE: u32 = 1;
const GICC_PMR_PRIO_LOW: u32 = 0xff;

const MAX_VECTORS: usize = 64;

/// Registered IRQ handlers. Mutated only during single-threaded boot setup
/// (before interrupts are globally enabled), read only from IRQ context
/// afterward — the single-CPU, no-locks model spec.md §5 describes.
static mut HANDLERS: [Option<fn()>; MAX_VECTORS] = [None; MAX_VECTORS];

/// Brings up the distributor and CPU interface: enable both, accept every
/// priority, no sub-priority grouping.
pub fn init() {
    unsafe {
        ptr::write_volatile(GICD_CTLR as *mut u32, GICD_CTLR_ENABLE);
        ptr::write_volatile(GICC_CTLR as *mut u32, GICC_CTLR_ENABLE);
        ptr::write_volatile(GICC_PMR as *mut u32, GICC_PMR_PRIO_LOW);
    }
}

/// Registers `handler` to run when `vector` fires. Must be called before
/// [`crate::arm::global_irq_enable`].
///
/// # Safety
/// Must not be called concurrently with an in-flight interrupt for the
/// same vector; this core only calls it during single-threaded boot setup.
pub unsafe fn irq_register(vector: u32, handler: fn()) {
    // SAFETY: single-core, called before interrupts are globally enabled.
    unsafe {
        HANDLERS[vector as usize % MAX_VECTORS] = Some(handler);
    }
}

/// Enables `vector` at the distributor, edge-triggered, priority 0.
pub fn irq_enable(vector: u32) {
    let reg = GICD_ISENABLER + 4 * (vector as usize / 32);
    unsafe {
        ptr::write_volatile(reg as *mut u32, 1 << (vector % 32));
    }
    let cfg_reg = GICD_ICFGR + 4 * (vector as usize / 16);
    let shift = (vector % 16) * 2;
    unsafe {
        let mut val = ptr::read_volatile(cfg_reg as *mut u32);
        val &= !(0b11 << shift);
        val |= 0b10 << shift; // edge-triggered
        ptr::write_volatile(cfg_reg as *mut u32, val);
    }
}

pub fn irq_clear_pending(vector: u32) {
    let reg = GICD_ICPENDR + 4 * (vector as usize / 32);
    unsafe {
        ptr::write_volatile(reg as *mut u32, 1 << (vector % 32));
    }
}

pub fn set_priority(vector: u32, priority: u8) {
    let reg = GICD_IPRIORITYR + (vector as usize);
    unsafe {
        ptr::write_volatile(reg as *mut u8, priority);
    }
}

/// The trap-dispatch entry point: acknowledge the highest-priority pending
/// interrupt, run its registered handler (if any), then signal end-of-
/// interrupt. Called from the exception vector installed by [`crate::start`].
pub fn dispatch() {
    let iar = unsafe { ptr::read_volatile(GICC_IAR as *const u32) };
    let vector = iar & 0x3ff;
    if (vector as usize) < MAX_VECTORS {
        // SAFETY: read-only after boot setup, single core.
        if let Some(handler) = unsafe { HANDLERS[vector as usize] } {
            handler();
        }
    }
    unsafe {
        ptr::write_volatile(GICC_EOIR as *mut u32, iar);
    }
}
