//! One-shot timer queue.
//!
//! Every thread owns at most two timers: the timeout of its current wait
//! (or delay) and the release timer of its period. The queue is a vector
//! sorted by deadline whose capacity covers both timers of every thread,
//! so arming never reallocates.

extern crate alloc;
use alloc::vec::Vec;

use super::Ticks;
use crate::thread::ThreadId;

/// Which of a thread's timers an entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Wait timeout or delay of a blocked thread.
    Timeout,
    /// Next release point of a periodic thread.
    Period,
}

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    deadline: Ticks,
    owner: ThreadId,
    kind: TimerKind,
}

/// Deadline-ordered set of armed timers.
pub struct TimerQueue {
    entries: Vec<TimerEntry>,
}

impl TimerQueue {
    /// Queue able to hold both timers of `threads` threads.
    pub fn with_thread_capacity(threads: usize) -> Self {
        Self {
            entries: Vec::with_capacity(threads * 2),
        }
    }

    /// Arm (or re-arm) a timer. Equal deadlines expire in arming order.
    pub fn arm(&mut self, owner: ThreadId, kind: TimerKind, deadline: Ticks) {
        self.cancel(owner, kind);
        let pos = self.entries.partition_point(|e| e.deadline <= deadline);
        debug_assert!(self.entries.len() < self.entries.capacity());
        self.entries.insert(pos, TimerEntry { deadline, owner, kind });
    }

    /// Disarm a timer. Returns whether it was armed.
    pub fn cancel(&mut self, owner: ThreadId, kind: TimerKind) -> bool {
        match self.position(owner, kind) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Disarm every timer of a thread.
    pub fn cancel_all(&mut self, owner: ThreadId) {
        self.entries.retain(|e| e.owner != owner);
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Ticks> {
        self.entries.first().map(|e| e.deadline)
    }

    /// Remove and return the earliest timer if it expired at `now`.
    pub fn pop_expired(&mut self, now: Ticks) -> Option<(ThreadId, TimerKind, Ticks)> {
        match self.entries.first() {
            Some(e) if e.deadline <= now => {
                let e = self.entries.remove(0);
                Some((e.owner, e.kind, e.deadline))
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, owner: ThreadId, kind: TimerKind) -> Option<usize> {
        self.entries.iter().position(|e| e.owner == owner && e.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(index: u32) -> ThreadId {
        ThreadId::new(index, 0)
    }

    #[test]
    fn test_expiry_order() {
        let mut q = TimerQueue::with_thread_capacity(4);
        q.arm(tid(1), TimerKind::Timeout, 30);
        q.arm(tid(2), TimerKind::Timeout, 10);
        q.arm(tid(3), TimerKind::Period, 20);
        q.arm(tid(1), TimerKind::Period, 10);
        assert_eq!(q.next_deadline(), Some(10));

        assert_eq!(q.pop_expired(5), None);
        assert_eq!(q.pop_expired(25), Some((tid(2), TimerKind::Timeout, 10)));
        assert_eq!(q.pop_expired(25), Some((tid(1), TimerKind::Period, 10)));
        assert_eq!(q.pop_expired(25), Some((tid(3), TimerKind::Period, 20)));
        assert_eq!(q.pop_expired(25), None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_rearm_replaces() {
        let mut q = TimerQueue::with_thread_capacity(1);
        q.arm(tid(1), TimerKind::Timeout, 100);
        q.arm(tid(1), TimerKind::Timeout, 50);
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_deadline(), Some(50));
        assert!(q.cancel(tid(1), TimerKind::Timeout));
        assert!(!q.cancel(tid(1), TimerKind::Timeout));
        assert!(q.is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let mut q = TimerQueue::with_thread_capacity(2);
        q.arm(tid(1), TimerKind::Timeout, 1);
        q.arm(tid(1), TimerKind::Period, 2);
        q.arm(tid(2), TimerKind::Period, 3);
        q.cancel_all(tid(1));
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_deadline(), Some(3));
    }
}
