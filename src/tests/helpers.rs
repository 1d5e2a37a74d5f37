//! Test helper utilities and common functionality.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch::host::HostArch;
use crate::config::NucleusConfig;
use crate::kernel::Nucleus;
use crate::thread::ThreadId;
use crate::time::Duration;

pub(crate) type Nk = Nucleus<HostArch>;

/// One nucleus on the hosted port, with the test thread as root context.
///
/// Every thread still alive is deleted when the fixture goes away.
pub(crate) struct Sim {
    pub(crate) nk: Arc<Nk>,
}

impl Sim {
    pub(crate) fn new() -> Self {
        Self::with_config(NucleusConfig::new())
    }

    pub(crate) fn with_config(config: NucleusConfig) -> Self {
        let nk = Nucleus::new(HostArch::new(), config).expect("nucleus construction");
        Self { nk }
    }

    /// Start a thread running `f` with its own handle on the nucleus.
    pub(crate) fn spawn<F>(&self, name: &str, prio: u8, f: F) -> ThreadId
    where
        F: FnOnce(Arc<Nk>) + Send + 'static,
    {
        let nk = self.nk.clone();
        self.nk
            .thread_init(name, prio, Duration::ZERO, move || f(nk))
            .expect("thread_init")
    }

    pub(crate) fn advance_ms(&self, ms: u64) {
        self.nk
            .advance_time(Duration::from_millis(ms))
            .expect("advance_time from root");
    }

    /// Virtual time in milliseconds.
    pub(crate) fn now_ms(&self) -> u64 {
        self.nk.now().as_nanos() / 1_000_000
    }

    /// Threads whose entry panicked (failed assertions inside threads).
    pub(crate) fn panics(&self) -> usize {
        self.nk.arch().panicked_contexts()
    }
}

impl Drop for Sim {
    fn drop(&mut self) {
        let _ = self.nk.shutdown();
    }
}

/// Ordered record of what the threads of a scenario did.
#[derive(Clone)]
pub(crate) struct Trace<T: Clone + Send + 'static> {
    inner: Arc<spin::Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Trace<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(spin::Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn push(&self, item: T) {
        self.inner.lock().push(item);
    }

    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.inner.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Simple linear congruential generator for property testing.
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state >> 16
    }

    pub(crate) fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        min + (self.next_u64() % (max - min))
    }

    pub(crate) fn gen_bool(&mut self) -> bool {
        self.next_u64() & 1 == 0
    }

    /// Fisher-Yates shuffle.
    pub(crate) fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.gen_range(0, i as u64 + 1) as usize;
            items.swap(i, j);
        }
    }
}
