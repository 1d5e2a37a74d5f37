//! Timeouts and timeout sequences.

use super::{Duration, TickClock, Ticks};
use crate::errors::{NkResult, NucleusError};

/// How long a blocking call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until satisfied, removed or interrupted.
    Infinite,
    /// Fail with `WouldBlock` instead of waiting.
    NonBlocking,
    /// Wait at most this long.
    Relative(Duration),
}

impl Timeout {
    /// Decode the raw driver convention: 0 is infinite, a negative value
    /// selects non-blocking mode, a positive value is a relative timeout in
    /// nanoseconds.
    pub fn from_nanos(nanos: i64) -> Self {
        match nanos {
            0 => Timeout::Infinite,
            n if n < 0 => Timeout::NonBlocking,
            n => Timeout::Relative(Duration::from_nanos(n as u64)),
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Timeout::Relative(Duration::from_millis(millis))
    }

    /// Turn this timeout into the absolute deadline of a wait that is about
    /// to start at `now_ns` nanoseconds. `None` means no deadline.
    ///
    /// Fails with `WouldBlock` in non-blocking mode and with `TimedOut` when
    /// the deadline (own or inherited from `seq`) is already reached.
    pub(crate) fn deadline(
        self,
        seq: Option<&TimeoutSeq>,
        now_ns: u64,
        clock: &TickClock,
    ) -> NkResult<Option<Ticks>> {
        let now = clock.tick_of(now_ns);
        match self {
            Timeout::Infinite => Ok(None),
            Timeout::NonBlocking => Err(NucleusError::WouldBlock),
            Timeout::Relative(d) => {
                let deadline = match seq {
                    Some(seq) => seq.deadline,
                    None => clock.deadline_after(now_ns, d.as_nanos()),
                };
                if deadline <= now {
                    Err(NucleusError::TimedOut)
                } else {
                    Ok(Some(deadline))
                }
            }
        }
    }
}

/// One absolute deadline shared by a series of blocking calls.
///
/// Each call in the series waits at most `deadline - now`, so the total
/// time spent across the series never exceeds the timeout the sequence
/// was started with. Sequences only affect relative timeouts; calls passing
/// `Timeout::Infinite` or `Timeout::NonBlocking` keep their own meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSeq {
    deadline: Ticks,
}

impl TimeoutSeq {
    /// Start a sequence at `now_ns` nanoseconds for `timeout`.
    pub fn new(timeout: Timeout, now_ns: u64, clock: &TickClock) -> Self {
        let deadline = match timeout {
            Timeout::Relative(d) => clock.deadline_after(now_ns, d.as_nanos()),
            Timeout::Infinite | Timeout::NonBlocking => Ticks::MAX,
        };
        Self { deadline }
    }

    /// Sequence ending at an absolute tick value.
    pub const fn absolute(deadline: Ticks) -> Self {
        Self { deadline }
    }

    pub const fn deadline(&self) -> Ticks {
        self.deadline
    }

    /// Remaining relative delay at `now`; zero or negative once expired.
    pub fn remaining(&self, now: Ticks) -> i64 {
        let diff = self.deadline as i128 - now as i128;
        diff.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn is_expired(&self, now: Ticks) -> bool {
        self.remaining(now) <= 0
    }
}
