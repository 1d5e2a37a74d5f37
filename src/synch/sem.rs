//! Counting semaphores.

use super::{wait_outcome, SynchFlags, SynchId, SynchKind};
use crate::arch::Arch;
use crate::errors::{NkResult, NucleusError, ResourceError};
use crate::kernel::Nucleus;
use crate::sched::Scheduler;
use crate::time::{Timeout, TimeoutSeq};

/// Handle of a counting semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemHandle(SynchId);

impl SemHandle {
    pub fn id(self) -> SynchId {
        self.0
    }
}

fn is_sem(kind: &SynchKind) -> bool {
    matches!(kind, SynchKind::Semaphore { .. })
}

impl<A: Arch, S: Scheduler> Nucleus<A, S> {
    pub fn sem_init(&self, count: u32) -> NkResult<SemHandle> {
        let mut g = self.lock();
        g.synch_create(SynchKind::Semaphore { count }, SynchFlags::PRIO)
            .map(SemHandle)
    }

    /// Destroy a semaphore; its waiters resume with `Removed`.
    pub fn sem_destroy(&self, sem: SemHandle) -> NkResult<()> {
        let mut g = self.lock();
        let s = g.resolve_synch(sem.0, is_sem)?;
        g.synch_destroy(s);
        Ok(())
    }

    pub fn sem_count(&self, sem: SemHandle) -> NkResult<u32> {
        let g = self.lock();
        let s = g.resolve_synch(sem.0, is_sem)?;
        match g.synch(s).map(|x| x.kind) {
            Some(SynchKind::Semaphore { count }) => Ok(count),
            _ => Err(NucleusError::Removed),
        }
    }

    /// Release one unit. The highest-priority waiter, if any, takes it
    /// directly and the count is left untouched.
    ///
    /// Fails with `CountOverflow` and changes nothing when the count is
    /// already `u32::MAX`.
    pub fn sem_up(&self, sem: SemHandle) -> NkResult<()> {
        let mut g = self.lock();
        let s = g.resolve_synch(sem.0, is_sem)?;
        if matches!(g.synch(s).map(|x| x.kind), Some(SynchKind::Semaphore { count: u32::MAX })) {
            return Err(ResourceError::CountOverflow.into());
        }
        if g.wakeup_one(s).is_none() {
            if let Some(synch) = g.synch_mut(s) {
                if let SynchKind::Semaphore { count } = &mut synch.kind {
                    *count += 1;
                }
            }
        }
        Ok(())
    }

    /// Acquire one unit, waiting as long as needed.
    pub fn sem_down(&self, sem: SemHandle) -> NkResult<()> {
        self.sem_timed_down(sem, Timeout::Infinite, None)
    }

    /// Acquire one unit. With `Timeout::NonBlocking` an empty semaphore
    /// fails with `WouldBlock` instead of waiting.
    pub fn sem_timed_down(
        &self,
        sem: SemHandle,
        timeout: Timeout,
        seq: Option<&TimeoutSeq>,
    ) -> NkResult<()> {
        let mut g = self.lock();
        g.check_blockable()?;
        let s = g.resolve_synch(sem.0, is_sem)?;
        if let Some(synch) = g.synch_mut(s) {
            if let SynchKind::Semaphore { count } = &mut synch.kind {
                if *count > 0 {
                    *count -= 1;
                    return Ok(());
                }
            }
        }
        let deadline = self.deadline(timeout, seq)?;
        g.sleep_on(s, deadline);
        let g = self.suspend(g);
        // Woken by `sem_up`: the unit was handed over.
        wait_outcome(Self::current_pend(&g))
    }
}
