//! The architectural "enable/disable interrupts" primitive spec.md §1
//! assumes as an external capability, plus the boot-time
//! `global_irq_enable` the core's boundary (§6) names.
//!
//! Grounded on the teacher's `arch/arm/arm.rs`, which declares the same
//! three functions (`intr_on`, `intr_off`, `intr_get`) but leaves them
//! `unimplemented!()`. This reimplementation fills them in with the `DAIF`
//! IRQ mask bit, the one register any aarch64 `-machine virt` target
//! actually has for this.

#[inline(always)]
pub fn global_irq_enable() {
    // SAFETY: clearing the IRQ mask bit is always safe; handlers must
    // already be registered via `gic::irq_register` before this runs.
    unsafe { core::arch::asm!("msr daifclr, #2", options(nomem, nostack)) };
}

#[inline(always)]
pub fn global_irq_disable() {
    // SAFETY: setting the IRQ mask bit is always safe.
    unsafe { core::arch::asm!("msr daifset, #2", options(nomem, nostack)) };
}

/// Are device (IRQ) interrupts currently unmasked?
#[inline(always)]
pub fn irq_get() -> bool {
    let daif: u64;
    // SAFETY: reading DAIF has no side effects.
    unsafe { core::arch::asm!("mrs {0}, daif", out(reg) daif, options(nomem, nostack)) };
    daif & (1 << 7) == 0
}
