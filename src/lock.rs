//! Interrupt-masking spin lock.
//!
//! Acquisition first masks interrupts on the local CPU, then takes the spin
//! lock; release drops the lock, then restores the saved interrupt state.
//! Holding the lock therefore excludes both other CPUs and interrupt
//! handlers of the local CPU, which makes it safe to take from an ISR.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use crate::arch::Arch;

/// Spin lock taken with interrupts disabled.
pub struct IrqLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> IrqLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    /// Mask interrupts through `arch` and acquire the lock.
    pub fn lock_irqsave<'a, A: Arch>(&'a self, arch: &'a A) -> IrqGuard<'a, T, A> {
        let irqs_were_enabled = arch.disable_interrupts();
        IrqGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            arch,
            irqs_were_enabled,
        }
    }

    /// Whether some context holds the lock right now.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// Scoped ownership of an [`IrqLock`].
pub struct IrqGuard<'a, T, A: Arch> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    arch: &'a A,
    irqs_were_enabled: bool,
}

impl<T, A: Arch> Deref for IrqGuard<'_, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, A: Arch> DerefMut for IrqGuard<'_, T, A> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T, A: Arch> Drop for IrqGuard<'_, T, A> {
    fn drop(&mut self) {
        // Unlock before unmasking, or a pending interrupt would spin on us.
        // SAFETY: the guard is dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.arch.restore_interrupts(self.irqs_were_enabled);
    }
}
