//! Thread builder for configuring thread creation.

extern crate alloc;
use alloc::string::String;
use alloc::sync::Arc;

use super::JoinHandle;
use crate::arch::Arch;
use crate::errors::NkResult;
use crate::kernel::Nucleus;
use crate::sched::{priority, Scheduler};
use crate::time::Duration;

/// Builder for configuring and starting real-time threads.
///
/// ```ignore
/// let worker = ThreadBuilder::new()
///     .name("sampler")
///     .priority(40)
///     .period(Duration::from_millis(1))
///     .spawn(&nucleus, move || loop {
///         if nk.thread_wait_period().is_err() { break; }
///     })?;
/// ```
#[derive(Debug, Clone)]
pub struct ThreadBuilder {
    name: String,
    priority: u8,
    /// Zero means non-periodic.
    period: Duration,
}

impl ThreadBuilder {
    /// A non-periodic thread at the lowest real-time priority.
    pub fn new() -> Self {
        Self {
            name: String::from("thread"),
            priority: priority::LOWEST,
            period: Duration::ZERO,
        }
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = name.into();
        self
    }

    /// Base priority; validated at spawn time.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Release period, the first release one period after spawning.
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Create and start the thread on `nucleus`.
    pub fn spawn<A, S, F>(self, nucleus: &Arc<Nucleus<A, S>>, f: F) -> NkResult<JoinHandle<A, S>>
    where
        A: Arch,
        S: Scheduler,
        F: FnOnce() + Send + 'static,
    {
        let id = nucleus.thread_init(&self.name, self.priority, self.period, f)?;
        Ok(JoinHandle::new(nucleus.clone(), id))
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::host::HostArch;
    use crate::config::NucleusConfig;
    use crate::errors::ContractError;
    use crate::thread::ThreadState;

    #[test]
    fn test_builder_defaults() {
        let b = ThreadBuilder::default();
        assert_eq!(b.priority, priority::LOWEST);
        assert!(b.period.is_zero());
        assert_eq!(b.name, "thread");
    }

    #[test]
    fn test_spawn_rejects_bad_priority() {
        let nk = Nucleus::<HostArch>::new(HostArch::new(), NucleusConfig::new()).unwrap();
        let err = ThreadBuilder::new().priority(0).spawn(&nk, || {}).unwrap_err();
        assert_eq!(err, ContractError::InvalidPriority(0).into());
        assert_eq!(nk.thread_count(), 1);
    }

    #[test]
    fn test_spawn_runs_and_joins() {
        let nk = Nucleus::<HostArch>::new(HostArch::new(), NucleusConfig::new()).unwrap();
        let handle = ThreadBuilder::new()
            .name("worker")
            .priority(10)
            .spawn(&nk, || {})
            .unwrap();
        // The new thread outranks root and ran to completion already.
        assert_eq!(handle.state(), Ok(ThreadState::Zombie));
        assert_eq!(nk.thread_name(handle.id()).unwrap(), "worker");
        handle.join().unwrap();
        assert_eq!(nk.thread_count(), 1);
    }
}
