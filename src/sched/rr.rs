//! Fixed-priority round-robin scheduler.
//!
//! One FIFO list per priority level and a bitmap of non-empty levels, so
//! picking the next thread costs a couple of word scans whatever the
//! number of ready threads.

extern crate alloc;
use alloc::vec;
use alloc::vec::Vec;

use super::trait_def::{priority, Placement, Scheduler};
use crate::mem::{Link, List};

const BITMAP_WORDS: usize = (priority::LEVELS + 63) / 64;

/// Priority-bucketed ready queue.
pub struct RoundRobinScheduler {
    levels: [List; priority::LEVELS],
    bitmap: [u64; BITMAP_WORDS],
    /// Level each queued thread sits on, by slot.
    queued_at: Vec<Option<u8>>,
    runnable: usize,
}

impl RoundRobinScheduler {
    fn level(prio: u8) -> usize {
        (prio as usize).min(priority::LEVELS - 1)
    }

    fn mark(&mut self, level: usize) {
        self.bitmap[level / 64] |= 1 << (level % 64);
    }

    fn unmark_if_empty(&mut self, level: usize) {
        if self.levels[level].is_empty() {
            self.bitmap[level / 64] &= !(1 << (level % 64));
        }
    }

    fn highest_level(&self) -> Option<usize> {
        self.bitmap
            .iter()
            .enumerate()
            .rev()
            .find(|(_, word)| **word != 0)
            .map(|(i, word)| i * 64 + 63 - word.leading_zeros() as usize)
    }
}

impl Scheduler for RoundRobinScheduler {
    fn with_capacity(max_threads: usize) -> Self {
        Self {
            levels: [List::new(); priority::LEVELS],
            bitmap: [0; BITMAP_WORDS],
            queued_at: vec![None; max_threads],
            runnable: 0,
        }
    }

    fn enqueue(&mut self, links: &mut [Link], thread: u32, prio: u8, placement: Placement) {
        let level = Self::level(prio);
        match placement {
            Placement::Tail => self.levels[level].push_back(links, thread),
            Placement::Head => self.levels[level].insert_by(links, thread, |_| true),
        }
        self.queued_at[thread as usize] = Some(level as u8);
        self.mark(level);
        self.runnable += 1;
    }

    fn dequeue(&mut self, links: &mut [Link], thread: u32) -> bool {
        let Some(level) = self.queued_at[thread as usize].take() else {
            return false;
        };
        let level = level as usize;
        self.levels[level].remove(links, thread);
        self.unmark_if_empty(level);
        self.runnable -= 1;
        true
    }

    fn peek_next(&self) -> Option<(u32, u8)> {
        let level = self.highest_level()?;
        self.levels[level].front().map(|t| (t, level as u8))
    }

    fn pick_next(&mut self, links: &mut [Link]) -> Option<u32> {
        let level = self.highest_level()?;
        let thread = self.levels[level].pop_front(links)?;
        self.queued_at[thread as usize] = None;
        self.unmark_if_empty(level);
        self.runnable -= 1;
        Some(thread)
    }

    fn runnable(&self) -> usize {
        self.runnable
    }
}
