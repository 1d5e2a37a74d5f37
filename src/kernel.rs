//! The nucleus: one owned registry of threads, objects and timers behind a
//! single interrupt-masking lock.
//!
//! Every service takes the lock through [`Nucleus::lock`], mutates state,
//! and lets the guard go. Releasing the guard is the one place where a
//! pending reschedule is acted upon: the switch is decided under the lock
//! and performed right after it is released, so no context ever sleeps
//! with the lock held.

extern crate alloc;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use crate::arch::Arch;
use crate::config::NucleusConfig;
use crate::errors::{ContractError, NkResult, NucleusError, ResourceError};
use crate::lock::{IrqGuard, IrqLock};
use crate::sched::{priority, Placement, RoundRobinScheduler, Scheduler};
use crate::state::{NucleusState, Switch, ROOT};
use crate::synch::{wait_outcome, Synch};
use crate::thread::{BlockReason, PendFlags, Tcb, ThreadId, ThreadState};
use crate::time::{Duration, Instant, TickClock, Ticks, Timeout, TimeoutSeq, TimerKind};

type State<A, S> = NucleusState<<A as Arch>::SavedContext, S>;

/// Real-time nucleus.
///
/// # Type Parameters
///
/// * `A` - Architecture implementation
/// * `S` - Scheduler implementation
pub struct Nucleus<A: Arch, S: Scheduler = RoundRobinScheduler> {
    arch: A,
    config: NucleusConfig,
    clock: TickClock,
    state: IrqLock<State<A, S>>,
    me: Weak<Self>,
}

/// Nucleus lock guard. Dropping it performs any pending reschedule.
pub(crate) struct NkGuard<'a, A: Arch, S: Scheduler> {
    nk: &'a Nucleus<A, S>,
    inner: ManuallyDrop<IrqGuard<'a, State<A, S>, A>>,
    reschedule: bool,
}

impl<A: Arch, S: Scheduler> NkGuard<'_, A, S> {
    /// Release without acting on pending reschedules. Used by a context
    /// that is no longer the running thread.
    fn release_quietly(mut self) {
        self.reschedule = false;
    }
}

impl<A: Arch, S: Scheduler> Deref for NkGuard<'_, A, S> {
    type Target = State<A, S>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<A: Arch, S: Scheduler> DerefMut for NkGuard<'_, A, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<A: Arch, S: Scheduler> Drop for NkGuard<'_, A, S> {
    fn drop(&mut self) {
        let switch = if self.reschedule {
            self.nk.sync_timer(&mut self.inner);
            self.inner.prepare_switch()
        } else {
            None
        };
        // SAFETY: dropped exactly once, here; the lock is released before
        // switching.
        unsafe { ManuallyDrop::drop(&mut self.inner) };
        if let Some(switch) = switch {
            self.nk.perform(switch);
        }
    }
}

/// Terminates the thread whose entry it wraps, on return or unwind.
struct ExitGuard<'a, A: Arch, S: Scheduler> {
    nk: &'a Nucleus<A, S>,
    id: ThreadId,
}

impl<A: Arch, S: Scheduler> Drop for ExitGuard<'_, A, S> {
    fn drop(&mut self) {
        self.nk.finish_thread(self.id);
    }
}

impl<A: Arch, S: Scheduler> Nucleus<A, S> {
    /// Create a nucleus. The calling context becomes its root thread.
    pub fn new(arch: A, config: NucleusConfig) -> NkResult<Arc<Self>> {
        config.validate()?;
        let clock = TickClock::new(config.tick_ns, arch.counter_frequency());
        let state = NucleusState::new(&config, arch.root_context())?;
        log::debug!(
            "nucleus up: tick {} ns, {} threads, {} objects",
            config.tick_ns,
            config.max_threads,
            config.max_objects
        );
        Ok(Arc::new_cyclic(|me| Self {
            arch,
            config,
            clock,
            state: IrqLock::new(state),
            me: me.clone(),
        }))
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn config(&self) -> &NucleusConfig {
        &self.config
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub(crate) fn lock(&self) -> NkGuard<'_, A, S> {
        NkGuard {
            nk: self,
            inner: ManuallyDrop::new(self.state.lock_irqsave(&self.arch)),
            reschedule: true,
        }
    }

    /// Release the lock (switching away if needed) and take it again once
    /// the caller runs anew.
    pub(crate) fn suspend<'a>(&'a self, guard: NkGuard<'a, A, S>) -> NkGuard<'a, A, S> {
        drop(guard);
        self.lock()
    }

    /// Pending flags of the running thread.
    pub(crate) fn current_pend(guard: &NkGuard<'_, A, S>) -> PendFlags {
        guard.tcb(guard.current).map_or(PendFlags::empty(), |t| t.pend)
    }

    fn sync_timer(&self, st: &mut State<A, S>) {
        let next = st.timers.next_deadline();
        if next != st.armed {
            st.armed = next;
            self.arch
                .program_timer(next.map(|ticks| self.clock.ticks_to_counter(ticks)));
        }
    }

    fn perform(&self, switch: Switch<A::SavedContext>) {
        match switch {
            // SAFETY: `prev` is the running context and `next` a live
            // context chosen by the scheduler; the lock is released.
            Switch::To { prev, next } => unsafe { self.arch.context_switch(&prev, &next) },
            Switch::Exit { next } => self.arch.context_exit(&next),
        }
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    pub fn now(&self) -> Instant {
        Instant::from_nanos(self.clock.counter_to_ns(self.arch.counter()))
    }

    pub fn now_ticks(&self) -> Ticks {
        self.clock.counter_to_ticks(self.arch.counter())
    }

    /// Start a timeout sequence for `timeout` at the current time.
    pub fn timeout_seq(&self, timeout: Timeout) -> TimeoutSeq {
        TimeoutSeq::new(timeout, self.now().as_nanos(), &self.clock)
    }

    /// Absolute deadline of a wait starting now.
    pub(crate) fn deadline(&self, timeout: Timeout, seq: Option<&TimeoutSeq>) -> NkResult<Option<Ticks>> {
        timeout.deadline(seq, self.now().as_nanos(), &self.clock)
    }

    // ------------------------------------------------------------------
    // Thread lifecycle
    // ------------------------------------------------------------------

    fn check_priority(prio: u8) -> NkResult<()> {
        if priority::is_valid(prio) {
            Ok(())
        } else {
            log::warn!("rejecting thread priority {}", prio);
            Err(ContractError::InvalidPriority(prio).into())
        }
    }

    fn trampoline<F>(nk: Weak<Self>, entry: F) -> impl FnOnce() + Send + 'static
    where
        F: FnOnce() + Send + 'static,
    {
        move || {
            let Some(nk) = nk.upgrade() else {
                return;
            };
            let _exit = ExitGuard {
                nk: &nk,
                id: nk.thread_current(),
            };
            entry();
        }
    }

    /// Create a dormant thread. It runs `entry` once started and
    /// terminates when `entry` returns.
    pub fn thread_create<F>(&self, name: &str, prio: u8, entry: F) -> NkResult<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::check_priority(prio)?;
        {
            let g = self.lock();
            if g.threads.len() >= g.threads.capacity() {
                return Err(ResourceError::TooManyThreads.into());
            }
        }
        let ctx = self
            .arch
            .create_context(name, Box::new(Self::trampoline(self.me.clone(), entry)))?;

        let mut g = self.lock();
        let exit = match g.synchs.insert(Synch::exit()) {
            Ok((exit, _)) => exit,
            Err(_) => {
                self.arch.cancel_context(&ctx);
                return Err(ResourceError::TooManyObjects.into());
            }
        };
        let tcb = Tcb::new(String::from(name), prio, exit, Some(Arc::new(ctx)));
        match g.threads.insert(tcb) {
            Ok((index, generation)) => {
                if let Some(tcb) = g.tcb_mut(index) {
                    tcb.generation = generation;
                }
                let id = ThreadId::new(index, generation);
                log::debug!("thread {} ({}) created at priority {}", id, name, prio);
                Ok(id)
            }
            Err(tcb) => {
                g.synchs.retire(exit);
                if let Some(ctx) = tcb.context {
                    self.arch.cancel_context(&ctx);
                }
                Err(ResourceError::TooManyThreads.into())
            }
        }
    }

    /// Make a dormant thread ready.
    pub fn thread_start(&self, id: ThreadId) -> NkResult<()> {
        let mut g = self.lock();
        let t = g.resolve_thread(id)?;
        if g.state_of(t) != Some(ThreadState::Dormant) {
            log::warn!("thread {} started twice", id);
            return Err(ContractError::InvalidState.into());
        }
        g.make_ready(t, Placement::Tail);
        log::debug!("thread {} started", id);
        Ok(())
    }

    /// Create, configure and start a thread in one step. A zero `period`
    /// makes a non-periodic thread. On failure nothing is left behind.
    pub fn thread_init<F>(&self, name: &str, prio: u8, period: Duration, entry: F) -> NkResult<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.thread_create(name, prio, entry)?;
        let started = if period.is_zero() {
            Ok(())
        } else {
            self.thread_set_period(id, period)
        }
        .and_then(|()| self.thread_start(id));
        if let Err(err) = started {
            self.discard(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Terminate and reap a thread that never ran.
    fn discard(&self, id: ThreadId) {
        let mut g = self.lock();
        let Ok(t) = g.resolve_thread(id) else {
            return;
        };
        g.terminate(t);
        if let Some(ctx) = g.tcb(t).and_then(|tcb| tcb.context.clone()) {
            self.arch.cancel_context(&ctx);
        }
        let reaped = g.reap(t);
        drop(g);
        drop(reaped);
    }

    /// Request termination of another thread.
    ///
    /// The target leaves every queue, releases the mutexes it owns and
    /// becomes a zombie until joined. Deleting a zombie frees its slot
    /// without joining. A thread ends itself by returning from its entry.
    pub fn thread_delete(&self, id: ThreadId) -> NkResult<()> {
        let mut g = self.lock();
        let t = g.resolve_thread(id)?;
        if t == ROOT {
            return Err(ContractError::InvalidState.into());
        }
        if t == g.current {
            log::warn!("thread {} tried to delete itself", id);
            return Err(ContractError::SelfTarget.into());
        }
        if g.state_of(t) == Some(ThreadState::Zombie) {
            let reaped = g.reap(t);
            drop(g);
            drop(reaped);
            return Ok(());
        }
        g.terminate(t);
        if let Some(ctx) = g.tcb(t).and_then(|tcb| tcb.context.clone()) {
            self.arch.cancel_context(&ctx);
        }
        Ok(())
    }

    /// Wait for a thread to terminate, then free its slot.
    ///
    /// Real-time threads block; the root context only succeeds if the
    /// target is already a zombie and gets `WouldBlock` otherwise.
    pub fn thread_join(&self, id: ThreadId) -> NkResult<()> {
        loop {
            let mut g = self.lock();
            let t = g.resolve_thread(id)?;
            if t == ROOT {
                return Err(ContractError::InvalidState.into());
            }
            if t == g.current {
                return Err(ContractError::SelfTarget.into());
            }
            if g.state_of(t) == Some(ThreadState::Zombie) {
                let reaped = g.reap(t);
                drop(g);
                drop(reaped);
                return Ok(());
            }
            if g.current == ROOT && g.irq_nesting == 0 {
                return Err(NucleusError::WouldBlock);
            }
            g.check_blockable()?;
            let Some(exit) = g.tcb(t).map(|tcb| tcb.exit_synch) else {
                return Err(NucleusError::Removed);
            };
            g.sleep_on(exit, None);
            let g = self.suspend(g);
            wait_outcome(Self::current_pend(&g))?;
        }
    }

    /// Called on the way out of a thread's entry.
    fn finish_thread(&self, id: ThreadId) {
        let mut g = self.lock();
        let t = match g.resolve_thread(id) {
            Ok(t) if t == g.current && g.state_of(t) != Some(ThreadState::Zombie) => t,
            // Deleted while parked: this host context is unwinding and
            // no longer owns the CPU.
            _ => return g.release_quietly(),
        };
        g.terminate(t);
    }

    // ------------------------------------------------------------------
    // Thread attributes
    // ------------------------------------------------------------------

    /// Change the base priority of a thread. Its effective priority stays
    /// raised while it owns a mutex wanted by a more urgent thread.
    pub fn thread_set_priority(&self, id: ThreadId, prio: u8) -> NkResult<()> {
        Self::check_priority(prio)?;
        let mut g = self.lock();
        let t = g.resolve_thread(id)?;
        if t == ROOT {
            return Err(ContractError::InvalidState.into());
        }
        if let Some(tcb) = g.tcb_mut(t) {
            tcb.base_priority = prio;
        }
        g.adjust_priority(t);
        Ok(())
    }

    /// Effective priority.
    pub fn thread_priority(&self, id: ThreadId) -> NkResult<u8> {
        let g = self.lock();
        let t = g.resolve_thread(id)?;
        Ok(g.priority_of(t))
    }

    pub fn thread_base_priority(&self, id: ThreadId) -> NkResult<u8> {
        let g = self.lock();
        let t = g.resolve_thread(id)?;
        Ok(g.tcb(t).map_or(priority::ROOT, |tcb| tcb.base_priority))
    }

    pub fn thread_state(&self, id: ThreadId) -> NkResult<ThreadState> {
        let g = self.lock();
        let t = g.resolve_thread(id)?;
        g.state_of(t).ok_or(NucleusError::Removed)
    }

    /// Flags recorded by the last wakeup of a thread.
    pub fn thread_pend_flags(&self, id: ThreadId) -> NkResult<PendFlags> {
        let g = self.lock();
        let t = g.resolve_thread(id)?;
        Ok(g.tcb(t).map_or(PendFlags::empty(), |tcb| tcb.pend))
    }

    pub fn thread_name(&self, id: ThreadId) -> NkResult<String> {
        let g = self.lock();
        let t = g.resolve_thread(id)?;
        Ok(g.tcb(t).map(|tcb| tcb.name.clone()).unwrap_or_default())
    }

    /// Make a thread periodic with its first release one `period` from
    /// now, or non-periodic with a zero period.
    pub fn thread_set_period(&self, id: ThreadId, period: Duration) -> NkResult<()> {
        let now = self.now().as_nanos();
        let ticks = self.clock.ns_to_ticks(period.as_nanos());
        let mut g = self.lock();
        let t = g.resolve_thread(id)?;
        if t == ROOT || g.state_of(t) == Some(ThreadState::Zombie) {
            return Err(ContractError::InvalidState.into());
        }
        let Some(tcb) = g.tcb_mut(t) else {
            return Err(NucleusError::Removed);
        };
        tcb.period = ticks;
        tcb.releases = 0;
        let waiting = tcb.state == ThreadState::Blocked(BlockReason::WaitPeriod);
        if ticks == 0 {
            g.timers.cancel(id, TimerKind::Period);
            if waiting {
                g.wake(t, PendFlags::empty());
            }
        } else {
            let first = self.clock.deadline_after(now, period.as_nanos());
            g.timers.arm(id, TimerKind::Period, first);
        }
        Ok(())
    }

    /// Wait for the next release point of the calling periodic thread.
    ///
    /// Returns `Overrun(n)` when `n` release points went by since the
    /// previous call; the count is consumed.
    pub fn thread_wait_period(&self) -> NkResult<()> {
        let mut g = self.lock();
        g.check_blockable()?;
        let cur = g.current;
        let pending = g.tcb(cur).map(|tcb| (tcb.period, tcb.releases));
        let Some((period, mut releases)) = pending else {
            return Err(NucleusError::Removed);
        };
        if period == 0 {
            return Err(ContractError::NotPeriodic.into());
        }
        if releases == 0 {
            g.block_current(BlockReason::WaitPeriod, None);
            g = self.suspend(g);
            if Self::current_pend(&g).contains(PendFlags::BREAK) {
                return Err(NucleusError::Interrupted);
            }
            match g.tcb(cur).map(|tcb| (tcb.period, tcb.releases)) {
                Some((0, _)) | None => return Err(ContractError::NotPeriodic.into()),
                Some((_, r)) => releases = r,
            }
        }
        if let Some(tcb) = g.tcb_mut(cur) {
            tcb.releases = 0;
        }
        let missed = releases.saturating_sub(1);
        if missed > 0 {
            log::warn!("thread {} overran its period, {} release(s) missed", g.thread_id(cur), missed);
            return Err(NucleusError::Overrun(missed));
        }
        Ok(())
    }

    fn delay_until<'a>(&'a self, mut g: NkGuard<'a, A, S>, deadline: Ticks) -> NkResult<()> {
        g.block_current(BlockReason::Delay, Some(deadline));
        let g = self.suspend(g);
        if Self::current_pend(&g).contains(PendFlags::BREAK) {
            Err(NucleusError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`. A zero duration returns at once.
    pub fn thread_sleep(&self, duration: Duration) -> NkResult<()> {
        let g = self.lock();
        g.check_blockable()?;
        if duration.is_zero() {
            return Ok(());
        }
        let deadline = self
            .clock
            .deadline_after(self.now().as_nanos(), duration.as_nanos());
        self.delay_until(g, deadline)
    }

    /// Sleep until `wakeup`. A time already passed returns at once.
    pub fn thread_sleep_until(&self, wakeup: Instant) -> NkResult<()> {
        let g = self.lock();
        g.check_blockable()?;
        let deadline = self.clock.ns_to_ticks(wakeup.as_nanos());
        if deadline <= self.now_ticks() {
            return Ok(());
        }
        self.delay_until(g, deadline)
    }

    /// Force a blocked thread out of its wait with the interrupted
    /// outcome. Returns whether it was blocked.
    pub fn thread_unblock(&self, id: ThreadId) -> NkResult<bool> {
        let mut g = self.lock();
        let t = g.resolve_thread(id)?;
        Ok(g.wake(t, PendFlags::BREAK))
    }

    /// The running thread (the interrupted one inside a handler).
    pub fn thread_current(&self) -> ThreadId {
        let g = self.lock();
        g.thread_id(g.current)
    }

    /// Move the running thread behind the other ready threads of its
    /// priority.
    pub fn thread_yield(&self) -> NkResult<()> {
        let mut g = self.lock();
        if g.irq_nesting > 0 {
            return Err(ContractError::IllegalContext.into());
        }
        let cur = g.current;
        if cur != ROOT {
            g.make_ready(cur, Placement::Tail);
        }
        Ok(())
    }

    /// Whether the caller is a real-time thread outside interrupt context.
    pub fn in_rt_context(&self) -> bool {
        let g = self.lock();
        g.current != ROOT && g.irq_nesting == 0
    }

    /// Disable preemption of the calling thread. Nestable. Blocking
    /// services fail with an illegal-context error until unlocked.
    pub fn sched_lock(&self) -> NkResult<()> {
        let mut g = self.lock();
        let cur = g.current;
        if cur == ROOT || g.irq_nesting > 0 {
            return Err(ContractError::IllegalContext.into());
        }
        if let Some(tcb) = g.tcb_mut(cur) {
            tcb.sched_locks += 1;
        }
        Ok(())
    }

    /// Undo one `sched_lock`; the last one runs any deferred reschedule.
    pub fn sched_unlock(&self) -> NkResult<()> {
        let mut g = self.lock();
        let cur = g.current;
        if g.irq_nesting > 0 {
            return Err(ContractError::IllegalContext.into());
        }
        match g.tcb_mut(cur) {
            Some(tcb) if tcb.sched_locks > 0 => {
                tcb.sched_locks -= 1;
                Ok(())
            }
            _ => Err(ContractError::InvalidState.into()),
        }
    }

    // ------------------------------------------------------------------
    // Interrupts
    // ------------------------------------------------------------------

    /// Enter interrupt context. Wakeups are collected until the outermost
    /// `irq_exit`.
    pub fn irq_enter(&self) {
        let mut g = self.lock();
        g.irq_nesting += 1;
    }

    /// Leave interrupt context, rescheduling on the outermost exit.
    pub fn irq_exit(&self) -> NkResult<()> {
        let mut g = self.lock();
        if g.irq_nesting == 0 {
            log::warn!("unbalanced irq_exit");
            return Err(ContractError::InvalidState.into());
        }
        g.irq_nesting -= 1;
        Ok(())
    }

    /// Run `handler` as an interrupt handler.
    pub fn with_irq_context<R>(&self, handler: impl FnOnce() -> R) -> R {
        self.irq_enter();
        let ret = handler();
        let balanced = self.irq_exit();
        debug_assert!(balanced.is_ok());
        ret
    }

    /// Timer interrupt handler: deliver expired timers and re-arm the
    /// one-shot timer for the next deadline.
    pub fn clock_tick(&self) {
        let now = self.now_ticks();
        let mut g = self.lock();
        g.expire_timers(now);
    }

    /// Number of live threads, root included.
    pub fn thread_count(&self) -> usize {
        self.lock().threads.len()
    }
}

#[cfg(any(test, feature = "std-shim"))]
impl<S: Scheduler> Nucleus<crate::arch::host::HostArch, S> {
    /// Let `duration` of virtual time go by, delivering every timer
    /// interrupt due in that window in deadline order. Threads woken on
    /// the way run to their next blocking point before the clock moves
    /// on. Root context only.
    pub fn advance_time(&self, duration: Duration) -> NkResult<()> {
        {
            let g = self.lock();
            if g.current != ROOT || g.irq_nesting > 0 {
                return Err(ContractError::IllegalContext.into());
            }
        }
        let target = self.arch.now_ns().saturating_add(duration.as_nanos());
        while let Some(deadline) = self.arch.armed_timer().filter(|d| *d <= target) {
            self.arch.set_time_ns(deadline);
            self.with_irq_context(|| self.clock_tick());
        }
        self.arch.set_time_ns(target);
        Ok(())
    }

    /// Delete and reap every thread but the root. Root context only.
    pub fn shutdown(&self) -> NkResult<()> {
        let mut g = self.lock();
        if g.current != ROOT || g.irq_nesting > 0 {
            return Err(ContractError::IllegalContext.into());
        }
        let live: alloc::vec::Vec<u32> = g
            .threads
            .iter()
            .map(|(t, _)| t)
            .filter(|t| *t != ROOT)
            .collect();
        for &t in &live {
            if g.state_of(t) != Some(ThreadState::Zombie) {
                g.terminate(t);
            }
            if let Some(ctx) = g.tcb(t).and_then(|tcb| tcb.context.clone()) {
                self.arch.cancel_context(&ctx);
            }
        }
        let reaped: alloc::vec::Vec<_> = live.iter().filter_map(|&t| g.reap(t)).collect();
        drop(g);
        log::debug!("nucleus shut down, {} thread(s) reaped", reaped.len());
        Ok(())
    }
}
