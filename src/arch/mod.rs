//! Architecture abstraction layer.
//!
//! The nucleus needs three things from the hardware: a monotonic counter
//! with a one-shot timer on top of it, local interrupt masking, and
//! execution contexts it can switch between. Everything else (interrupt
//! controller programming, FPU handling, trap dispatch) stays on the
//! architecture side of this trait.

extern crate alloc;
use alloc::boxed::Box;

use crate::errors::ResourceError;

#[cfg(any(test, feature = "std-shim"))]
pub mod host;

/// Architecture abstraction trait.
///
/// A nucleus owns one `Arch` instance and calls it with its global lock
/// either held (timer and interrupt-mask operations) or released (context
/// switches).
pub trait Arch: Send + Sync + 'static {
    /// Saved execution context of one thread.
    type SavedContext: Send + Sync + 'static;

    /// Current value of the monotonic hardware counter.
    fn counter(&self) -> u64;

    /// Counter frequency in Hz.
    fn counter_frequency(&self) -> u64;

    /// Program the one-shot timer to fire at an absolute counter value, or
    /// disarm it with `None`. A deadline in the past fires immediately.
    fn program_timer(&self, deadline: Option<u64>);

    /// Mask interrupts on the local CPU, returning whether they were
    /// enabled before.
    fn disable_interrupts(&self) -> bool;

    /// Restore the state returned by [`Arch::disable_interrupts`].
    fn restore_interrupts(&self, was_enabled: bool);

    fn interrupts_enabled(&self) -> bool;

    /// Context of the caller, which becomes the nucleus root context.
    fn root_context(&self) -> Self::SavedContext;

    /// Prepare a context that runs `entry` the first time it is switched
    /// to. Returning from `entry` must not return into the context switch
    /// code; `entry` ends with a call to [`Arch::context_exit`].
    fn create_context(
        &self,
        name: &str,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<Self::SavedContext, ResourceError>;

    /// Save the running context into `prev` and resume `next`. Returns when
    /// `prev` is switched to again.
    ///
    /// # Safety
    ///
    /// - `prev` must be the context currently executing
    /// - `next` must be a context created by this instance that is not
    ///   running and has not exited
    /// - the nucleus lock must not be held
    unsafe fn context_switch(&self, prev: &Self::SavedContext, next: &Self::SavedContext);

    /// Resume `next` without saving the running context, which is
    /// abandoned. On a port where the abandoned context keeps a host
    /// thread, this returns so the host thread can unwind and finish.
    fn context_exit(&self, next: &Self::SavedContext);

    /// Tear down a context that will never be switched to again.
    fn cancel_context(&self, ctx: &Self::SavedContext);
}
