//! Events: a pending flag plus a broadcast wait queue.

use super::{wait_outcome, SynchFlags, SynchId, SynchKind};
use crate::arch::Arch;
use crate::errors::NkResult;
use crate::kernel::Nucleus;
use crate::sched::Scheduler;
use crate::thread::PendFlags;
use crate::time::{Timeout, TimeoutSeq};

/// Handle of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(SynchId);

impl EventHandle {
    pub fn id(self) -> SynchId {
        self.0
    }
}

fn is_event(kind: &SynchKind) -> bool {
    matches!(kind, SynchKind::Event { .. })
}

impl<A: Arch, S: Scheduler> Nucleus<A, S> {
    /// Create an event, initially pending or not.
    pub fn event_init(&self, pending: bool) -> NkResult<EventHandle> {
        let mut g = self.lock();
        g.synch_create(SynchKind::Event { pending }, SynchFlags::PRIO)
            .map(EventHandle)
    }

    /// Destroy an event. Current waiters resume with `Removed`, and so
    /// does every later use of the handle.
    pub fn event_destroy(&self, event: EventHandle) -> NkResult<()> {
        let mut g = self.lock();
        let s = g.resolve_synch(event.0, is_event)?;
        g.synch_destroy(s);
        Ok(())
    }

    /// Set the event and wake all of its waiters. The flag stays set for
    /// later callers until a successful wait consumes it.
    pub fn event_signal(&self, event: EventHandle) -> NkResult<()> {
        let mut g = self.lock();
        let s = g.resolve_synch(event.0, is_event)?;
        if let Some(synch) = g.synch_mut(s) {
            synch.kind = SynchKind::Event { pending: true };
        }
        g.flush(s, PendFlags::empty());
        Ok(())
    }

    /// Wake the current waiters without setting the flag.
    pub fn event_pulse(&self, event: EventHandle) -> NkResult<()> {
        let mut g = self.lock();
        let s = g.resolve_synch(event.0, is_event)?;
        g.flush(s, PendFlags::empty());
        Ok(())
    }

    pub fn event_clear(&self, event: EventHandle) -> NkResult<()> {
        let mut g = self.lock();
        let s = g.resolve_synch(event.0, is_event)?;
        if let Some(synch) = g.synch_mut(s) {
            synch.kind = SynchKind::Event { pending: false };
        }
        Ok(())
    }

    pub fn event_is_pending(&self, event: EventHandle) -> NkResult<bool> {
        let g = self.lock();
        let s = g.resolve_synch(event.0, is_event)?;
        Ok(matches!(g.synch(s).map(|x| x.kind), Some(SynchKind::Event { pending: true })))
    }

    /// Wait for the event without a timeout.
    pub fn event_wait(&self, event: EventHandle) -> NkResult<()> {
        self.event_timed_wait(event, Timeout::Infinite, None)
    }

    /// Wait for the event to be signalled, consuming the flag on success.
    ///
    /// A set flag is consumed at once. Otherwise the caller blocks until
    /// signalled or pulsed, until `timeout` (or the deadline of `seq`)
    /// expires, until it is unblocked, or until the event is destroyed.
    pub fn event_timed_wait(
        &self,
        event: EventHandle,
        timeout: Timeout,
        seq: Option<&TimeoutSeq>,
    ) -> NkResult<()> {
        let mut g = self.lock();
        g.check_blockable()?;
        let s = g.resolve_synch(event.0, is_event)?;
        let pending = matches!(g.synch(s).map(|x| x.kind), Some(SynchKind::Event { pending: true }));
        if !pending {
            let deadline = self.deadline(timeout, seq)?;
            g.sleep_on(s, deadline);
            g = self.suspend(g);
            wait_outcome(Self::current_pend(&g))?;
        }
        // A waiter woken by a signal also clears the flag. The event may
        // have been destroyed since, and its slot handed to a new object.
        let s = match g.resolve_synch(event.0, is_event) {
            Ok(s) => s,
            Err(_) => return Ok(()),
        };
        if let Some(synch) = g.synch_mut(s) {
            synch.kind = SynchKind::Event { pending: false };
        }
        Ok(())
    }
}
