//! Nucleus state and the scheduling core.
//!
//! Everything in here runs with the nucleus lock held. Functions only
//! record decisions: a thread that blocks is marked blocked and a pending
//! reschedule is flagged, and the context switch itself happens once the
//! lock is released (see `kernel::NkGuard`).

extern crate alloc;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::{NucleusConfig, ROOT_THREAD_NAME};
use crate::errors::{ContractError, NkResult, NucleusError, ResourceError};
use crate::mem::{Link, ObjectPool, PoolError};
use crate::sched::{priority, Placement, Scheduler};
use crate::synch::Synch;
use crate::thread::{BlockReason, PendFlags, Tcb, ThreadId, ThreadState};
use crate::time::{Ticks, TimerKind, TimerQueue};

/// Slot of the root context in the thread table.
pub(crate) const ROOT: u32 = 0;

/// Context switch decided under the lock, performed after release.
pub(crate) enum Switch<C> {
    /// Save `prev`, resume `next`.
    To { prev: Arc<C>, next: Arc<C> },
    /// The running thread terminated; resume `next` without saving.
    Exit { next: Arc<C> },
}

pub(crate) fn pool_error(err: PoolError) -> NucleusError {
    match err {
        PoolError::Invalid => ContractError::InvalidHandle.into(),
        PoolError::Retired => NucleusError::Removed,
    }
}

pub(crate) struct NucleusState<C, S> {
    pub(crate) threads: ObjectPool<Tcb<C>>,
    /// Ready-queue / wait-queue links, by thread slot.
    pub(crate) links: Vec<Link>,
    pub(crate) synchs: ObjectPool<Synch>,
    /// Owner claim-list links, by object slot.
    pub(crate) claim_links: Vec<Link>,
    pub(crate) sched: S,
    pub(crate) timers: TimerQueue,
    /// Slot of the thread owning the CPU.
    pub(crate) current: u32,
    pub(crate) resched: bool,
    pub(crate) irq_nesting: u32,
    /// Deadline the hardware timer is programmed for.
    pub(crate) armed: Option<Ticks>,
    pub(crate) user_objects: usize,
    pub(crate) max_objects: usize,
}

impl<C, S: Scheduler> NucleusState<C, S> {
    /// Build the tables and install the caller as the root context.
    pub(crate) fn new(config: &NucleusConfig, root: C) -> NkResult<Self> {
        let mut threads = ObjectPool::with_capacity(config.max_threads);
        let mut synchs = ObjectPool::with_capacity(config.object_slots());
        let (exit, _) = synchs
            .insert(Synch::exit())
            .map_err(|_| ResourceError::InvalidConfig)?;
        let mut tcb = Tcb::new(
            String::from(ROOT_THREAD_NAME),
            priority::ROOT,
            exit,
            Some(Arc::new(root)),
        );
        tcb.state = ThreadState::Running;
        threads.insert(tcb).map_err(|_| ResourceError::InvalidConfig)?;

        Ok(Self {
            threads,
            links: vec![Link::default(); config.max_threads],
            synchs,
            claim_links: vec![Link::default(); config.object_slots()],
            sched: S::with_capacity(config.max_threads),
            timers: TimerQueue::with_thread_capacity(config.max_threads),
            current: ROOT,
            resched: false,
            irq_nesting: 0,
            armed: None,
            user_objects: 0,
            max_objects: config.max_objects,
        })
    }

    pub(crate) fn tcb(&self, t: u32) -> Option<&Tcb<C>> {
        self.threads.by_index(t)
    }

    pub(crate) fn tcb_mut(&mut self, t: u32) -> Option<&mut Tcb<C>> {
        self.threads.by_index_mut(t)
    }

    /// Slot of a live thread.
    pub(crate) fn resolve_thread(&self, id: ThreadId) -> NkResult<u32> {
        self.threads
            .get(id.index(), id.generation())
            .map(|_| id.index())
            .map_err(pool_error)
    }

    pub(crate) fn thread_id(&self, t: u32) -> ThreadId {
        self.tcb(t).map_or(ThreadId::new(t, 0), |tcb| tcb.id(t))
    }

    pub(crate) fn priority_of(&self, t: u32) -> u8 {
        self.tcb(t).map_or(priority::ROOT, |tcb| tcb.priority)
    }

    pub(crate) fn state_of(&self, t: u32) -> Option<ThreadState> {
        self.tcb(t).map(|tcb| tcb.state)
    }

    /// Only a real-time thread outside interrupt context, with the
    /// scheduler unlocked, may block.
    pub(crate) fn check_blockable(&self) -> NkResult<()> {
        let sched_locked = self.tcb(self.current).map_or(false, |t| t.sched_locks > 0);
        if self.irq_nesting > 0 || self.current == ROOT || sched_locked {
            log::warn!(
                "blocking call from unblockable context (thread {}, irq nesting {}, sched locked {})",
                self.thread_id(self.current),
                self.irq_nesting,
                sched_locked
            );
            return Err(ContractError::IllegalContext.into());
        }
        Ok(())
    }

    pub(crate) fn make_ready(&mut self, t: u32, placement: Placement) {
        let Some(tcb) = self.threads.by_index_mut(t) else {
            return;
        };
        tcb.state = ThreadState::Ready;
        let prio = tcb.priority;
        // The root context is the fallback of an empty queue.
        if t != ROOT {
            self.sched.enqueue(&mut self.links, t, prio, placement);
        }
        self.resched = true;
    }

    /// Mark the running thread blocked, arming its timeout if any.
    pub(crate) fn block_current(&mut self, reason: BlockReason, deadline: Option<Ticks>) {
        let cur = self.current;
        let Some(tcb) = self.threads.by_index_mut(cur) else {
            return;
        };
        tcb.state = ThreadState::Blocked(reason);
        tcb.pend = PendFlags::empty();
        let id = tcb.id(cur);
        if let Some(deadline) = deadline {
            self.timers.arm(id, TimerKind::Timeout, deadline);
        }
        log::trace!("thread {} blocks on {:?}, deadline {:?}", id, reason, deadline);
        self.resched = true;
    }

    /// Make a blocked thread ready, recording `flags` as the reason.
    /// Returns false if the thread was not blocked.
    pub(crate) fn wake(&mut self, t: u32, flags: PendFlags) -> bool {
        if !matches!(self.state_of(t), Some(ThreadState::Blocked(_))) {
            return false;
        }
        self.forget_sleeper(t);
        let id = self.thread_id(t);
        self.timers.cancel(id, TimerKind::Timeout);
        if let Some(tcb) = self.tcb_mut(t) {
            tcb.pend |= flags;
        }
        log::trace!("thread {} woken, flags {:?}", id, flags);
        self.make_ready(t, Placement::Tail);
        true
    }

    fn apply_priority(&mut self, t: u32, prio: u8) {
        let Some(tcb) = self.threads.by_index_mut(t) else {
            return;
        };
        tcb.priority = prio;
        let (state, wait_on) = (tcb.state, tcb.wait_on);
        match state {
            ThreadState::Ready if t != ROOT => {
                if self.sched.dequeue(&mut self.links, t) {
                    self.sched.enqueue(&mut self.links, t, prio, Placement::Tail);
                }
                self.resched = true;
            }
            ThreadState::Running => self.resched = true,
            ThreadState::Blocked(BlockReason::Synch) => {
                if let Some(s) = wait_on {
                    self.requeue_waiter(s, t);
                }
            }
            _ => {}
        }
    }

    /// Recompute the effective priority of `t` from its base priority and
    /// the objects it owns, then follow the chain of owners it is blocked
    /// on. The walk is bounded by the thread table size, so an ownership
    /// cycle cannot hang the nucleus.
    pub(crate) fn adjust_priority(&mut self, mut t: u32) {
        for _ in 0..self.threads.capacity() {
            let Some(target) = self.inherited_priority(t) else {
                return;
            };
            if self.priority_of(t) == target {
                return;
            }
            log::trace!("thread {} priority {} -> {}", self.thread_id(t), self.priority_of(t), target);
            self.apply_priority(t, target);
            match self.pi_owner_of_wait(t) {
                Some(owner) => t = owner,
                None => return,
            }
        }
    }

    /// Terminate thread `t`: drop it from every queue and timer, release
    /// what it owns, wake its joiners. The caller arranges the switch if
    /// `t` is running.
    pub(crate) fn terminate(&mut self, t: u32) {
        let Some(state) = self.state_of(t) else {
            return;
        };
        match state {
            ThreadState::Ready => {
                self.sched.dequeue(&mut self.links, t);
            }
            ThreadState::Blocked(_) => self.forget_sleeper(t),
            _ => {}
        }
        let id = self.thread_id(t);
        self.timers.cancel_all(id);
        self.release_claims(t);
        let Some(tcb) = self.tcb_mut(t) else {
            return;
        };
        tcb.state = ThreadState::Zombie;
        tcb.sched_locks = 0;
        tcb.period = 0;
        tcb.releases = 0;
        let exit = tcb.exit_synch;
        self.flush(exit, PendFlags::empty());
        self.resched = true;
        log::debug!("thread {} terminated", id);
    }

    /// Free the slot of a zombie thread.
    pub(crate) fn reap(&mut self, t: u32) -> Option<Tcb<C>> {
        let tcb = self.threads.retire(t)?;
        self.synchs.retire(tcb.exit_synch);
        log::debug!("thread {} reaped", tcb.id(t));
        Some(tcb)
    }

    /// Deliver every timer expired at `now`.
    pub(crate) fn expire_timers(&mut self, now: Ticks) {
        while let Some((id, kind, deadline)) = self.timers.pop_expired(now) {
            let Ok(t) = self.resolve_thread(id) else {
                continue;
            };
            match kind {
                TimerKind::Timeout => {
                    self.wake(t, PendFlags::TIMEO);
                }
                TimerKind::Period => {
                    let Some(tcb) = self.tcb_mut(t) else {
                        continue;
                    };
                    if tcb.period == 0 {
                        continue;
                    }
                    tcb.releases += 1;
                    let next = deadline.saturating_add(tcb.period);
                    let waiting = tcb.state == ThreadState::Blocked(BlockReason::WaitPeriod);
                    self.timers.arm(id, TimerKind::Period, next);
                    if waiting {
                        self.wake(t, PendFlags::empty());
                    }
                }
            }
        }
    }

    /// Decide the context switch owed to the last state changes.
    ///
    /// Nothing happens inside an interrupt handler (the outermost exit
    /// reschedules) or while the running thread holds the scheduler lock;
    /// the request stays pending in both cases. A running thread is only
    /// preempted by a strictly higher priority, and keeps its turn.
    pub(crate) fn prepare_switch(&mut self) -> Option<Switch<C>> {
        if !self.resched || self.irq_nesting > 0 {
            return None;
        }
        let cur = self.current;
        let (cur_state, cur_prio, cur_locks) = self
            .tcb(cur)
            .map(|t| (t.state, t.priority, t.sched_locks))?;
        if cur_state == ThreadState::Running {
            if cur_locks > 0 {
                return None;
            }
            match self.sched.peek_next() {
                Some((_, prio)) if prio > cur_prio => {}
                _ => {
                    self.resched = false;
                    return None;
                }
            }
            self.make_ready(cur, Placement::Head);
        }
        self.resched = false;

        let next = self.sched.pick_next(&mut self.links).unwrap_or(ROOT);
        let tcb = self.tcb_mut(next)?;
        tcb.state = ThreadState::Running;
        let next_ctx = tcb.context.clone()?;
        if next == cur {
            return None;
        }
        self.current = next;
        log::trace!("switch {} -> {}", self.thread_id(cur), self.thread_id(next));
        if cur_state == ThreadState::Zombie {
            Some(Switch::Exit { next: next_ctx })
        } else {
            let prev = self.tcb(cur)?.context.clone()?;
            Some(Switch::To { prev, next: next_ctx })
        }
    }
}
