//! Hosted port: nucleus threads on OS threads, time on a virtual clock.
//!
//! Every nucleus context is backed by an OS thread parked on a gate. A
//! context switch opens the gate of the next context and parks the caller
//! on its own, so exactly one backing thread executes nucleus code at any
//! time, as on a single CPU. The counter is a virtual nanosecond clock
//! that only moves when the test driver advances it, which makes every
//! timing observable in tests exact.
//!
//! Cancelling a parked context makes it unwind with a private payload.
//! While such a thread unwinds it may still take the nucleus lock (its exit
//! path checks the thread's state), so interrupt masking is a no-op on it:
//! the virtual interrupt flag belongs to whoever holds the baton.

extern crate alloc;
extern crate std;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, PoisonError};

use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use super::Arch;
use crate::errors::ResourceError;
use crate::time::NANOS_PER_SEC;

const NO_TIMER: u64 = u64::MAX;

std::thread_local! {
    static CANCELLED: Cell<bool> = const { Cell::new(false) };
}

/// Unwind payload of a cancelled context.
struct ContextCancelled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Parked,
    Granted,
    Cancelled,
}

struct Gate {
    state: Mutex<GateState>,
    wake: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Parked),
            wake: Condvar::new(),
        }
    }

    fn grant(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != GateState::Cancelled {
            *state = GateState::Granted;
            self.wake.notify_one();
        }
    }

    fn cancel(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = GateState::Cancelled;
        self.wake.notify_all();
    }

    /// Park until granted (true) or cancelled (false).
    fn wait(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match *state {
                GateState::Granted => {
                    *state = GateState::Parked;
                    return true;
                }
                GateState::Cancelled => return false,
                GateState::Parked => {
                    state = self.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

/// Saved context of the hosted port.
pub struct HostContext {
    name: String,
    gate: Arc<Gate>,
}

impl HostContext {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
struct Stats {
    panicked: AtomicUsize,
    finished: AtomicUsize,
}

/// Hosted architecture port.
pub struct HostArch {
    now_ns: AtomicU64,
    timer: AtomicU64,
    irqs_enabled: AtomicBool,
    stats: Arc<Stats>,
    gates: Mutex<Vec<Weak<Gate>>>,
}

impl HostArch {
    pub fn new() -> Self {
        Self {
            now_ns: AtomicU64::new(0),
            timer: AtomicU64::new(NO_TIMER),
            irqs_enabled: AtomicBool::new(true),
            stats: Arc::new(Stats::default()),
            gates: Mutex::new(Vec::new()),
        }
    }

    /// Virtual clock reading in nanoseconds.
    pub fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }

    /// Move the virtual clock forward to `ns`. The clock never goes back.
    pub fn set_time_ns(&self, ns: u64) {
        self.now_ns.fetch_max(ns, Ordering::AcqRel);
    }

    /// Counter value the one-shot timer is armed for.
    pub fn armed_timer(&self) -> Option<u64> {
        match self.timer.load(Ordering::Acquire) {
            NO_TIMER => None,
            deadline => Some(deadline),
        }
    }

    /// Contexts whose entry panicked.
    pub fn panicked_contexts(&self) -> usize {
        self.stats.panicked.load(Ordering::Acquire)
    }

    /// Contexts whose backing thread ran its entry to completion.
    pub fn finished_contexts(&self) -> usize {
        self.stats.finished.load(Ordering::Acquire)
    }

    fn register(&self, gate: &Arc<Gate>) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.retain(|g| g.strong_count() > 0);
        gates.push(Arc::downgrade(gate));
    }
}

impl Default for HostArch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostArch {
    fn drop(&mut self) {
        let gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        for gate in gates.iter().filter_map(Weak::upgrade) {
            gate.cancel();
        }
    }
}

impl Arch for HostArch {
    type SavedContext = HostContext;

    fn counter(&self) -> u64 {
        self.now_ns()
    }

    fn counter_frequency(&self) -> u64 {
        NANOS_PER_SEC
    }

    fn program_timer(&self, deadline: Option<u64>) {
        self.timer.store(deadline.unwrap_or(NO_TIMER), Ordering::Release);
    }

    fn disable_interrupts(&self) -> bool {
        if CANCELLED.with(Cell::get) {
            return false;
        }
        self.irqs_enabled.swap(false, Ordering::AcqRel)
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        if was_enabled && !CANCELLED.with(Cell::get) {
            self.irqs_enabled.store(true, Ordering::Release);
        }
    }

    fn interrupts_enabled(&self) -> bool {
        self.irqs_enabled.load(Ordering::Acquire)
    }

    fn root_context(&self) -> HostContext {
        let gate = Arc::new(Gate::new());
        self.register(&gate);
        HostContext {
            name: String::from("root"),
            gate,
        }
    }

    fn create_context(
        &self,
        name: &str,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<HostContext, ResourceError> {
        let gate = Arc::new(Gate::new());
        let start = gate.clone();
        let stats = self.stats.clone();
        std::thread::Builder::new()
            .name(String::from(name))
            .spawn(move || {
                if !start.wait() {
                    return;
                }
                drop(start);
                match panic::catch_unwind(AssertUnwindSafe(entry)) {
                    Ok(()) => {
                        stats.finished.fetch_add(1, Ordering::AcqRel);
                    }
                    Err(payload) if payload.is::<ContextCancelled>() => {}
                    Err(_) => {
                        stats.panicked.fetch_add(1, Ordering::AcqRel);
                    }
                }
            })
            .map_err(|_| ResourceError::ContextUnavailable)?;
        self.register(&gate);
        Ok(HostContext {
            name: String::from(name),
            gate,
        })
    }

    unsafe fn context_switch(&self, prev: &HostContext, next: &HostContext) {
        next.gate.grant();
        if !prev.gate.wait() {
            CANCELLED.with(|c| c.set(true));
            panic::resume_unwind(Box::new(ContextCancelled));
        }
    }

    fn context_exit(&self, next: &HostContext) {
        next.gate.grant();
    }

    fn cancel_context(&self, ctx: &HostContext) {
        ctx.gate.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands the CPU back to `to` when dropped, even while unwinding.
    struct ExitTo {
        arch: Arc<HostArch>,
        to: Arc<HostContext>,
    }

    impl Drop for ExitTo {
        fn drop(&mut self) {
            self.arch.context_exit(&self.to);
        }
    }

    fn spawn(
        arch: &Arc<HostArch>,
        root: &Arc<HostContext>,
        body: impl FnOnce() + Send + 'static,
    ) -> HostContext {
        let exit = ExitTo {
            arch: arch.clone(),
            to: root.clone(),
        };
        arch.create_context(
            "worker",
            Box::new(move || {
                let _exit = exit;
                body();
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_switch_runs_context_until_exit() {
        let arch = Arc::new(HostArch::new());
        let root = Arc::new(arch.root_context());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let ctx = spawn(&arch, &root, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ctx.name(), "worker");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        unsafe { arch.context_switch(&root, &ctx) };
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_context_still_hands_back() {
        let arch = Arc::new(HostArch::new());
        let root = Arc::new(arch.root_context());
        let ctx = spawn(&arch, &root, || panic!("entry failure"));
        unsafe { arch.context_switch(&root, &ctx) };
        // The backing thread records the panic after handing back.
        while arch.panicked_contexts() == 0 {
            std::thread::yield_now();
        }
        assert_eq!(arch.finished_contexts(), 0);
    }

    #[test]
    fn test_cancelled_context_never_runs() {
        let arch = Arc::new(HostArch::new());
        let root = Arc::new(arch.root_context());
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let ctx = spawn(&arch, &root, move || r.store(true, Ordering::SeqCst));
        arch.cancel_context(&ctx);
        // A grant after cancellation is ignored.
        arch.context_exit(&ctx);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_virtual_clock_and_timer() {
        let arch = HostArch::new();
        assert_eq!(arch.counter(), 0);
        arch.set_time_ns(500);
        arch.set_time_ns(100);
        assert_eq!(arch.counter(), 500);
        assert_eq!(arch.armed_timer(), None);
        arch.program_timer(Some(1_000));
        assert_eq!(arch.armed_timer(), Some(1_000));
        arch.program_timer(None);
        assert_eq!(arch.armed_timer(), None);
    }
}
