//! Scheduler trait definition.

use crate::mem::Link;

/// Where a thread re-enters its priority group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Behind every thread of the same priority (wakeup, yield).
    Tail,
    /// In front of them (a preempted thread keeps its turn).
    Head,
}

/// Ready-queue policy.
///
/// The nucleus calls every method under its global lock, passing the
/// thread link table; threads are named by their slot index. The running
/// thread is never queued, and neither is the root context, which runs
/// whenever the queue is empty.
pub trait Scheduler: Send + 'static {
    /// Build a scheduler for a thread table of `max_threads` slots.
    fn with_capacity(max_threads: usize) -> Self
    where
        Self: Sized;

    /// Queue a ready thread at the given effective priority.
    fn enqueue(&mut self, links: &mut [Link], thread: u32, priority: u8, placement: Placement);

    /// Remove a queued thread. Returns false if it was not queued.
    fn dequeue(&mut self, links: &mut [Link], thread: u32) -> bool;

    /// The thread `pick_next` would return, with its queued priority.
    fn peek_next(&self) -> Option<(u32, u8)>;

    /// Remove and return the highest-priority ready thread; among equals,
    /// the one queued first.
    fn pick_next(&mut self, links: &mut [Link]) -> Option<u32>;

    /// Number of queued threads.
    fn runnable(&self) -> usize;
}

/// Priority levels for threads. Higher is more urgent.
pub mod priority {
    /// The root context; real-time threads never run at this level.
    pub const ROOT: u8 = 0;

    /// Lowest real-time priority.
    pub const LOWEST: u8 = 1;

    /// Highest real-time priority.
    pub const HIGHEST: u8 = 99;

    /// Number of distinct levels, root included.
    pub const LEVELS: usize = HIGHEST as usize + 1;

    /// Whether `prio` may be given to a real-time thread.
    pub const fn is_valid(prio: u8) -> bool {
        prio >= LOWEST && prio <= HIGHEST
    }
}
