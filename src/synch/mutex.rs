//! Non-recursive mutexes with priority inheritance.
//!
//! The owner runs at least at the priority of the most urgent waiter,
//! transitively through chains of owners blocked on other mutexes. Unlock
//! passes ownership directly to the head waiter, so the mutex is never
//! observed free while someone waits for it.

use super::{SynchFlags, SynchId, SynchKind};
use crate::arch::Arch;
use crate::errors::{ContractError, NkResult, NucleusError};
use crate::kernel::Nucleus;
use crate::sched::Scheduler;
use crate::thread::{PendFlags, ThreadId};
use crate::time::{Timeout, TimeoutSeq};

/// Handle of a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexHandle(SynchId);

impl MutexHandle {
    pub fn id(self) -> SynchId {
        self.0
    }
}

fn is_mutex(kind: &SynchKind) -> bool {
    matches!(kind, SynchKind::Mutex)
}

impl<A: Arch, S: Scheduler> Nucleus<A, S> {
    pub fn mutex_init(&self) -> NkResult<MutexHandle> {
        let mut g = self.lock();
        g.synch_create(SynchKind::Mutex, SynchFlags::PRIO | SynchFlags::PIP)
            .map(MutexHandle)
    }

    /// Destroy a mutex. Waiters resume with `Removed`; an owner loses the
    /// mutex along with any priority it inherited through it.
    pub fn mutex_destroy(&self, mutex: MutexHandle) -> NkResult<()> {
        let mut g = self.lock();
        let s = g.resolve_synch(mutex.0, is_mutex)?;
        g.synch_destroy(s);
        Ok(())
    }

    pub fn mutex_owner(&self, mutex: MutexHandle) -> NkResult<Option<ThreadId>> {
        let g = self.lock();
        let s = g.resolve_synch(mutex.0, is_mutex)?;
        Ok(g.synch(s).and_then(|x| x.owner).map(|t| g.thread_id(t)))
    }

    pub fn mutex_lock(&self, mutex: MutexHandle) -> NkResult<()> {
        self.mutex_timed_lock(mutex, Timeout::Infinite, None)
    }

    /// Acquire the mutex.
    ///
    /// An explicit unblock does not abort the wait: the caller re-checks
    /// the mutex and goes back to sleep with its original deadline.
    pub fn mutex_timed_lock(
        &self,
        mutex: MutexHandle,
        timeout: Timeout,
        seq: Option<&TimeoutSeq>,
    ) -> NkResult<()> {
        let mut g = self.lock();
        g.check_blockable()?;
        let cur = g.current;
        let s = g.resolve_synch(mutex.0, is_mutex)?;
        match g.synch(s).and_then(|x| x.owner) {
            None => {
                g.set_owner(s, cur);
                return Ok(());
            }
            Some(owner) if owner == cur => {
                log::warn!("thread {} relocks a mutex it owns", g.thread_id(cur));
                return Err(ContractError::Deadlock.into());
            }
            Some(_) => {}
        }
        let deadline = self.deadline(timeout, seq)?;

        loop {
            g.sleep_on(s, deadline);
            g = self.suspend(g);
            let pend = Self::current_pend(&g);
            if pend.contains(PendFlags::RMID) {
                return Err(NucleusError::Removed);
            }
            if pend.contains(PendFlags::TIMEO) {
                return Err(NucleusError::TimedOut);
            }
            let s = g.resolve_synch(mutex.0, is_mutex)?;
            match g.synch(s).and_then(|x| x.owner) {
                Some(owner) if owner == cur => return Ok(()),
                None => {
                    g.set_owner(s, cur);
                    return Ok(());
                }
                Some(_) => {}
            }
            // Broken out of the wait: sleep again until the same deadline.
            if let Some(deadline) = deadline {
                if deadline <= self.now_ticks() {
                    return Err(NucleusError::TimedOut);
                }
            }
            log::trace!("thread {} resumes its mutex wait", g.thread_id(cur));
        }
    }

    /// Release the mutex, handing it to the most urgent waiter.
    pub fn mutex_unlock(&self, mutex: MutexHandle) -> NkResult<()> {
        let mut g = self.lock();
        if g.irq_nesting > 0 {
            return Err(ContractError::IllegalContext.into());
        }
        let s = g.resolve_synch(mutex.0, is_mutex)?;
        if g.synch(s).and_then(|x| x.owner) != Some(g.current) {
            log::warn!("thread {} unlocks a mutex it does not own", g.thread_id(g.current));
            return Err(ContractError::NotOwner.into());
        }
        g.release_ownership(s);
        Ok(())
    }
}
