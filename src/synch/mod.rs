//! Wait-queue substrate shared by events, semaphores and mutexes.
//!
//! A synchronization object is a queue of blocked threads, ordered by
//! effective priority with arrival order among equals (or plain FIFO), plus
//! an optional owner. Owned objects take part in priority inheritance: the
//! owner runs at least at the priority of the head waiter, and each thread
//! keeps the objects it owns on an intrusive claim list so its effective
//! priority is recomputed from them whenever ownership or a waiter changes.

use crate::errors::{ContractError, NkResult, NucleusError, ResourceError};
use crate::mem::List;
use crate::sched::Scheduler;
use crate::state::{pool_error, NucleusState};
use crate::thread::PendFlags;
use crate::time::Ticks;

pub mod event;
pub mod mutex;
pub mod sem;

pub use event::EventHandle;
pub use mutex::MutexHandle;
pub use sem::SemHandle;

/// Generation-checked object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SynchId {
    index: u32,
    generation: u32,
}

impl SynchId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

bitflags::bitflags! {
    /// Queueing discipline of an object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct SynchFlags: u8 {
        /// Waiters ordered by priority (else FIFO).
        const PRIO = 1 << 0;
        /// Owned object with priority inheritance.
        const PIP  = 1 << 1;
    }
}

/// Per-kind state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SynchKind {
    Event { pending: bool },
    Semaphore { count: u32 },
    Mutex,
    /// Termination of a thread, waited on by `thread_join`.
    Exit,
}

#[derive(Debug)]
pub(crate) struct Synch {
    pub(crate) kind: SynchKind,
    pub(crate) flags: SynchFlags,
    pub(crate) waiters: List,
    pub(crate) owner: Option<u32>,
}

impl Synch {
    pub(crate) fn new(kind: SynchKind, flags: SynchFlags) -> Self {
        Self {
            kind,
            flags,
            waiters: List::new(),
            owner: None,
        }
    }

    pub(crate) fn exit() -> Self {
        Self::new(SynchKind::Exit, SynchFlags::empty())
    }
}

/// Map the pending flags of a resumed wait to its outcome. Removal wins
/// over timeout, timeout over interruption; no flag means satisfied.
pub(crate) fn wait_outcome(pend: PendFlags) -> NkResult<()> {
    if pend.contains(PendFlags::RMID) {
        Err(NucleusError::Removed)
    } else if pend.contains(PendFlags::TIMEO) {
        Err(NucleusError::TimedOut)
    } else if pend.contains(PendFlags::BREAK) {
        Err(NucleusError::Interrupted)
    } else {
        Ok(())
    }
}

impl<C, S: Scheduler> NucleusState<C, S> {
    /// Allocate a user-visible object.
    pub(crate) fn synch_create(&mut self, kind: SynchKind, flags: SynchFlags) -> NkResult<SynchId> {
        if self.user_objects >= self.max_objects {
            return Err(ResourceError::TooManyObjects.into());
        }
        let (index, generation) = self
            .synchs
            .insert(Synch::new(kind, flags))
            .map_err(|_| ResourceError::TooManyObjects)?;
        self.user_objects += 1;
        log::debug!("object {}.{} created as {:?}", index, generation, kind);
        Ok(SynchId::new(index, generation))
    }

    /// Slot of a live object, rejecting handles of another kind.
    pub(crate) fn resolve_synch(&self, id: SynchId, is_kind: fn(&SynchKind) -> bool) -> NkResult<u32> {
        let synch = self.synchs.get(id.index, id.generation).map_err(pool_error)?;
        if is_kind(&synch.kind) {
            Ok(id.index)
        } else {
            Err(ContractError::InvalidHandle.into())
        }
    }

    pub(crate) fn synch(&self, s: u32) -> Option<&Synch> {
        self.synchs.by_index(s)
    }

    pub(crate) fn synch_mut(&mut self, s: u32) -> Option<&mut Synch> {
        self.synchs.by_index_mut(s)
    }

    /// Flush and free a user object. Every waiter resumes with `Removed`.
    pub(crate) fn synch_destroy(&mut self, s: u32) {
        let woken = self.flush(s, PendFlags::RMID);
        if let Some(owner) = self.clear_owner(s) {
            self.adjust_priority(owner);
        }
        if self.synchs.retire(s).is_some() {
            self.user_objects -= 1;
            log::debug!("object slot {} destroyed, {} waiter(s) woken", s, woken);
        }
    }

    fn enqueue_waiter(&mut self, s: u32, t: u32) {
        let prio = self.priority_of(t);
        let Self {
            threads,
            synchs,
            links,
            ..
        } = self;
        let Some(synch) = synchs.by_index_mut(s) else {
            return;
        };
        if synch.flags.contains(SynchFlags::PRIO) {
            synch.waiters.insert_by(links, t, |other| {
                threads.by_index(other).map_or(true, |o| o.priority < prio)
            });
        } else {
            synch.waiters.push_back(links, t);
        }
        if let Some(tcb) = threads.by_index_mut(t) {
            tcb.wait_on = Some(s);
        }
    }

    /// Reposition a waiter whose priority changed.
    pub(crate) fn requeue_waiter(&mut self, s: u32, t: u32) {
        let Self { synchs, links, .. } = self;
        let Some(synch) = synchs.by_index_mut(s) else {
            return;
        };
        if !synch.flags.contains(SynchFlags::PRIO) {
            return;
        }
        synch.waiters.remove(links, t);
        self.enqueue_waiter(s, t);
    }

    /// Block the running thread on `s` until woken or `deadline`.
    pub(crate) fn sleep_on(&mut self, s: u32, deadline: Option<Ticks>) {
        let cur = self.current;
        self.enqueue_waiter(s, cur);
        self.block_current(crate::thread::BlockReason::Synch, deadline);
        if let Some(owner) = self.pi_owner(s) {
            self.adjust_priority(owner);
        }
    }

    /// Remove a blocked thread from the queue it waits on, if any.
    pub(crate) fn forget_sleeper(&mut self, t: u32) {
        let Some(s) = self.tcb_mut(t).and_then(|tcb| tcb.wait_on.take()) else {
            return;
        };
        let Self { synchs, links, .. } = self;
        if let Some(synch) = synchs.by_index_mut(s) {
            synch.waiters.remove(links, t);
        }
        if let Some(owner) = self.pi_owner(s) {
            self.adjust_priority(owner);
        }
    }

    /// Wake the head waiter of `s`. An owned object passes straight to it.
    pub(crate) fn wakeup_one(&mut self, s: u32) -> Option<u32> {
        let Self { synchs, links, .. } = self;
        let synch = synchs.by_index_mut(s)?;
        let w = synch.waiters.pop_front(links)?;
        let owned = synch.flags.contains(SynchFlags::PIP);
        if let Some(tcb) = self.tcb_mut(w) {
            tcb.wait_on = None;
        }
        if owned {
            let previous = self.clear_owner(s);
            self.set_owner(s, w);
            if let Some(previous) = previous {
                self.adjust_priority(previous);
            }
            self.adjust_priority(w);
        }
        self.wake(w, PendFlags::empty());
        Some(w)
    }

    /// Wake every waiter of `s` with `flags`, in queue order, as one step.
    pub(crate) fn flush(&mut self, s: u32, flags: PendFlags) -> usize {
        let mut woken = 0;
        loop {
            let Self { synchs, links, .. } = self;
            let Some(w) = synchs.by_index_mut(s).and_then(|x| x.waiters.pop_front(links)) else {
                break;
            };
            if let Some(tcb) = self.tcb_mut(w) {
                tcb.wait_on = None;
            }
            self.wake(w, flags);
            woken += 1;
        }
        if woken > 0 {
            if let Some(owner) = self.pi_owner(s) {
                self.adjust_priority(owner);
            }
        }
        woken
    }

    pub(crate) fn set_owner(&mut self, s: u32, t: u32) {
        let Self {
            threads,
            synchs,
            claim_links,
            ..
        } = self;
        let Some(synch) = synchs.by_index_mut(s) else {
            return;
        };
        synch.owner = Some(t);
        if synch.flags.contains(SynchFlags::PIP) {
            if let Some(tcb) = threads.by_index_mut(t) {
                tcb.claims.push_back(claim_links, s);
            }
        }
    }

    /// Drop the owner of `s`, returning it. The caller recomputes its
    /// priority.
    pub(crate) fn clear_owner(&mut self, s: u32) -> Option<u32> {
        let Self {
            threads,
            synchs,
            claim_links,
            ..
        } = self;
        let synch = synchs.by_index_mut(s)?;
        let owner = synch.owner.take()?;
        if let Some(tcb) = threads.by_index_mut(owner) {
            tcb.claims.remove(claim_links, s);
        }
        Some(owner)
    }

    /// Give up ownership of `s`: hand it to the head waiter or leave it
    /// free.
    pub(crate) fn release_ownership(&mut self, s: u32) {
        if self.wakeup_one(s).is_none() {
            if let Some(previous) = self.clear_owner(s) {
                self.adjust_priority(previous);
            }
        }
    }

    /// Release every object owned by `t`.
    pub(crate) fn release_claims(&mut self, t: u32) {
        while let Some(s) = self.tcb(t).and_then(|tcb| tcb.claims.front()) {
            self.release_ownership(s);
        }
    }

    /// Owner of `s` if `s` propagates priority to it.
    pub(crate) fn pi_owner(&self, s: u32) -> Option<u32> {
        let synch = self.synch(s)?;
        if synch.flags.contains(SynchFlags::PIP) {
            synch.owner
        } else {
            None
        }
    }

    pub(crate) fn pi_owner_of_wait(&self, t: u32) -> Option<u32> {
        self.tcb(t)?.wait_on.and_then(|s| self.pi_owner(s))
    }

    /// Base priority of `t` raised to the head waiter of every object it
    /// owns.
    pub(crate) fn inherited_priority(&self, t: u32) -> Option<u8> {
        let tcb = self.tcb(t)?;
        let mut prio = tcb.base_priority;
        for s in tcb.claims.iter(&self.claim_links) {
            if let Some(head) = self.synch(s).and_then(|x| x.waiters.front()) {
                prio = prio.max(self.priority_of(head));
            }
        }
        Some(prio)
    }
}
