//! Threads: identity, state machine and control block.

extern crate alloc;
use alloc::string::String;
use alloc::sync::Arc;

use crate::mem::List;
use crate::time::Ticks;

pub mod builder;
pub mod handle;

pub use builder::ThreadBuilder;
pub use handle::JoinHandle;

/// Generation-checked thread identifier.
///
/// The index names a slot of the thread table; the generation tells apart
/// the successive threads that reuse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId {
    index: u32,
    generation: u32,
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

impl ThreadId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the thread table.
    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Why a thread is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Waiting on a synchronization object (event, semaphore, mutex or a
    /// thread's termination).
    Synch,
    /// Sleeping until a deadline.
    Delay,
    /// Waiting for the next release point of its period.
    WaitPeriod,
}

/// Thread state machine.
///
/// ```text
/// Dormant --start--> Ready --selected--> Running --block--> Blocked
///                      ^                  |   |                |
///                      +----preempted-----+   +--terminate--> Zombie
///                      +-------------------wake----------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Dormant,
    Ready,
    Running,
    Blocked(BlockReason),
    Zombie,
}

impl ThreadState {
    pub fn is_blocked(self) -> bool {
        matches!(self, ThreadState::Blocked(_))
    }

    /// Ready or running.
    pub fn is_runnable(self) -> bool {
        matches!(self, ThreadState::Ready | ThreadState::Running)
    }
}

bitflags::bitflags! {
    /// Why the last blocking call of a thread returned.
    ///
    /// Flags are set by whoever wakes the thread and cleared when the
    /// thread blocks again.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PendFlags: u8 {
        /// The wait deadline expired.
        const TIMEO = 1 << 0;
        /// The object waited on was destroyed.
        const RMID  = 1 << 1;
        /// The wait was broken by `thread_unblock`.
        const BREAK = 1 << 2;
    }
}

/// Thread control block.
///
/// Only ever touched under the nucleus lock. Queue membership lives in the
/// nucleus' link table, not here.
pub(crate) struct Tcb<C> {
    pub(crate) name: String,
    pub(crate) generation: u32,
    /// Priority set by the user.
    pub(crate) base_priority: u8,
    /// Base priority raised by inheritance.
    pub(crate) priority: u8,
    pub(crate) state: ThreadState,
    pub(crate) pend: PendFlags,
    /// Object slot this thread is queued on while blocked on a synch.
    pub(crate) wait_on: Option<u32>,
    /// Priority-inheriting objects owned by this thread.
    pub(crate) claims: List,
    /// Release interval in ticks, 0 when not periodic.
    pub(crate) period: Ticks,
    /// Release points reached and not yet consumed by `wait_period`.
    pub(crate) releases: u64,
    /// Nesting depth of `sched_lock`.
    pub(crate) sched_locks: u32,
    /// Object slot flushed when the thread terminates.
    pub(crate) exit_synch: u32,
    pub(crate) context: Option<Arc<C>>,
}

impl<C> Tcb<C> {
    pub(crate) fn new(name: String, priority: u8, exit_synch: u32, context: Option<Arc<C>>) -> Self {
        Self {
            name,
            generation: 0,
            base_priority: priority,
            priority,
            state: ThreadState::Dormant,
            pend: PendFlags::empty(),
            wait_on: None,
            claims: List::new(),
            period: 0,
            releases: 0,
            sched_locks: 0,
            exit_synch,
            context,
        }
    }

    pub(crate) fn id(&self, index: u32) -> ThreadId {
        ThreadId::new(index, self.generation)
    }
}
