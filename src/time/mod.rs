//! Time keeping: nucleus ticks, wall-clock durations and unit conversion.
//!
//! The hardware counter runs at the frequency reported by the
//! architecture layer. The nucleus works in ticks of `tick_ns`
//! nanoseconds. Conversion rules:
//!
//! - a *point in time* read from the counter is rounded down to the tick
//!   containing it;
//! - a *duration* given in nanoseconds is rounded up to whole ticks;
//! - a *deadline* is `now + duration` taken in nanoseconds and then rounded
//!   up, so a wait starting mid-tick never ends before the requested
//!   amount of time has passed;
//! - ticks convert back to nanoseconds exactly.
//!
//! Hence `ns_to_ticks(ticks_to_ns(t)) == t` for every `t`, and converting
//! a duration twice yields the same tick count as converting it once.

pub mod timeout;
pub mod timer;

pub use timeout::{Timeout, TimeoutSeq};
pub use timer::{TimerKind, TimerQueue};

/// Nucleus time unit.
pub type Ticks = u64;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A point on the nucleus' monotonic time line, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64);

impl Instant {
    /// Create a new instant from nanoseconds since the clock origin.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get nanoseconds since the clock origin.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Duration elapsed since `earlier`, zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_nanos()))
    }
}

/// A span of time in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

/// Converts between hardware counter values, nanoseconds and ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickClock {
    tick_ns: u64,
    counter_hz: u64,
}

impl TickClock {
    /// Create a converter for a counter running at `counter_hz`, with
    /// nucleus ticks of `tick_ns` nanoseconds.
    pub const fn new(tick_ns: u64, counter_hz: u64) -> Self {
        Self { tick_ns, counter_hz }
    }

    /// Length of one tick in nanoseconds.
    pub const fn tick_ns(&self) -> u64 {
        self.tick_ns
    }

    /// Duration to ticks, rounded up.
    pub fn ns_to_ticks(&self, nanos: u64) -> Ticks {
        nanos / self.tick_ns + u64::from(nanos % self.tick_ns != 0)
    }

    /// Tick containing the point in time `nanos`.
    pub fn tick_of(&self, nanos: u64) -> Ticks {
        nanos / self.tick_ns
    }

    /// First tick boundary at least `duration` nanoseconds after `now_ns`.
    pub fn deadline_after(&self, now_ns: u64, duration: u64) -> Ticks {
        self.ns_to_ticks(now_ns.saturating_add(duration))
    }

    /// Ticks to nanoseconds, saturating.
    pub fn ticks_to_ns(&self, ticks: Ticks) -> u64 {
        ticks.saturating_mul(self.tick_ns)
    }

    /// Counter value to nanoseconds since the counter origin, rounded down.
    pub fn counter_to_ns(&self, counter: u64) -> u64 {
        if self.counter_hz == NANOS_PER_SEC {
            return counter;
        }
        let nanos = (counter as u128 * NANOS_PER_SEC as u128) / self.counter_hz as u128;
        nanos.min(u64::MAX as u128) as u64
    }

    /// Nanoseconds to the first counter value at or after that time.
    pub fn ns_to_counter(&self, nanos: u64) -> u64 {
        if self.counter_hz == NANOS_PER_SEC {
            return nanos;
        }
        let num = nanos as u128 * self.counter_hz as u128;
        let counter = num / NANOS_PER_SEC as u128 + u128::from(num % NANOS_PER_SEC as u128 != 0);
        counter.min(u64::MAX as u128) as u64
    }

    /// Counter value to the tick containing it.
    pub fn counter_to_ticks(&self, counter: u64) -> Ticks {
        self.tick_of(self.counter_to_ns(counter))
    }

    /// First counter value belonging to tick `ticks`.
    pub fn ticks_to_counter(&self, ticks: Ticks) -> u64 {
        self.ns_to_counter(self.ticks_to_ns(ticks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_rounds_up() {
        let clock = TickClock::new(1_000, NANOS_PER_SEC);
        assert_eq!(clock.ns_to_ticks(0), 0);
        assert_eq!(clock.ns_to_ticks(1), 1);
        assert_eq!(clock.ns_to_ticks(1_000), 1);
        assert_eq!(clock.ns_to_ticks(1_001), 2);
        assert_eq!(clock.ticks_to_ns(3), 3_000);
    }

    #[test]
    fn test_conversion_is_idempotent() {
        let clock = TickClock::new(333, NANOS_PER_SEC);
        for ns in [0u64, 1, 332, 333, 334, 1_000_000, 999_999_999] {
            let ticks = clock.ns_to_ticks(ns);
            assert!(clock.ticks_to_ns(ticks) >= ns);
            assert_eq!(clock.ns_to_ticks(clock.ticks_to_ns(ticks)), ticks);
        }
    }

    #[test]
    fn test_deadline_from_mid_tick_rounds_up() {
        let clock = TickClock::new(1_000_000, NANOS_PER_SEC);
        // 1 ms from 0.9 ms ends at 1.9 ms, inside tick 1, so tick 2.
        assert_eq!(clock.deadline_after(900_000, 1_000_000), 2);
        assert_eq!(clock.deadline_after(1_000_000, 1_000_000), 2);
        assert!(clock.ticks_to_ns(clock.deadline_after(1, 999_999)) >= 1_000_000);
        assert_eq!(clock.deadline_after(u64::MAX - 5, 10), clock.ns_to_ticks(u64::MAX));
    }

    #[test]
    fn test_duration_constructors_saturate() {
        assert_eq!(Duration::from_millis(u64::MAX).as_nanos(), u64::MAX);
        assert_eq!(Duration::from_secs(u64::MAX / 2).as_nanos(), u64::MAX);
        assert_eq!(Duration::from_micros(u64::MAX).as_nanos(), u64::MAX);
        assert_eq!(Duration::from_millis(3).as_nanos(), 3_000_000);
    }

    #[test]
    fn test_counter_conversion() {
        // 19.2 MHz counter, as on the Pi's generic timer.
        let clock = TickClock::new(1_000, 19_200_000);
        assert_eq!(clock.counter_to_ns(19_200_000), NANOS_PER_SEC);
        assert_eq!(clock.counter_to_ticks(19_200_000), 1_000_000);
        let counter = clock.ticks_to_counter(5);
        assert!(clock.counter_to_ns(counter) >= 5_000);
        assert_eq!(clock.counter_to_ticks(counter), 5);
    }

    #[test]
    fn test_instant_arithmetic() {
        let t = Instant::from_nanos(1_000);
        let later = t + Duration::from_micros(2);
        assert_eq!(later.as_nanos(), 3_000);
        assert_eq!(later.saturating_duration_since(t), Duration::from_nanos(2_000));
        assert_eq!(t.saturating_duration_since(later), Duration::ZERO);
    }
}
