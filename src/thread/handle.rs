//! Join handle for a thread spawned through [`ThreadBuilder`].
//!
//! [`ThreadBuilder`]: super::ThreadBuilder

extern crate alloc;
use alloc::sync::Arc;
use core::fmt;

use super::{ThreadId, ThreadState};
use crate::arch::Arch;
use crate::errors::NkResult;
use crate::kernel::Nucleus;
use crate::sched::{RoundRobinScheduler, Scheduler};

/// Owns the right to join a thread.
///
/// Dropping the handle leaves the thread running; once it terminates it
/// stays a zombie until deleted.
pub struct JoinHandle<A: Arch, S: Scheduler = RoundRobinScheduler> {
    nucleus: Arc<Nucleus<A, S>>,
    id: ThreadId,
}

impl<A: Arch, S: Scheduler> JoinHandle<A, S> {
    pub(crate) fn new(nucleus: Arc<Nucleus<A, S>>, id: ThreadId) -> Self {
        Self { nucleus, id }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Wait for the thread to terminate and free its slot.
    ///
    /// From the root context this only succeeds once the thread is a
    /// zombie; otherwise it fails with `WouldBlock` and the handle is lost,
    /// so poll [`JoinHandle::state`] first.
    pub fn join(self) -> NkResult<()> {
        self.nucleus.thread_join(self.id)
    }

    pub fn state(&self) -> NkResult<ThreadState> {
        self.nucleus.thread_state(self.id)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state(), Ok(ThreadState::Zombie))
    }

    /// Break the thread out of its current wait.
    pub fn unblock(&self) -> NkResult<bool> {
        self.nucleus.thread_unblock(self.id)
    }

    /// Terminate the thread without waiting for it.
    pub fn delete(self) -> NkResult<()> {
        self.nucleus.thread_delete(self.id)
    }
}

impl<A: Arch, S: Scheduler> fmt::Debug for JoinHandle<A, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::host::HostArch;
    use crate::config::NucleusConfig;
    use crate::errors::NucleusError;
    use crate::thread::{BlockReason, ThreadBuilder};
    use crate::time::Duration;

    #[test]
    fn test_handle_unblock_and_delete() {
        let nk = Nucleus::<HostArch>::new(HostArch::new(), NucleusConfig::new()).unwrap();
        let nk2 = nk.clone();
        let handle = ThreadBuilder::new()
            .priority(5)
            .spawn(&nk, move || {
                let _ = nk2.thread_sleep(Duration::from_secs(10));
                let _ = nk2.thread_sleep(Duration::from_secs(10));
            })
            .unwrap();
        assert_eq!(handle.state(), Ok(ThreadState::Blocked(BlockReason::Delay)));
        assert!(!handle.is_finished());
        assert!(alloc::format!("{:?}", handle).starts_with("JoinHandle { id: "));
        // First sleep is interrupted, the thread goes back to sleep.
        assert_eq!(handle.unblock(), Ok(true));
        assert_eq!(handle.state(), Ok(ThreadState::Blocked(BlockReason::Delay)));

        let id = handle.id();
        handle.delete().unwrap();
        assert_eq!(nk.thread_state(id), Ok(ThreadState::Zombie));
        nk.thread_delete(id).unwrap();
        assert_eq!(nk.thread_state(id), Err(NucleusError::Removed));
        nk.shutdown().unwrap();
    }
}
