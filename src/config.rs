//! Nucleus configuration.
//!
//! All limits are fixed when the nucleus is built: thread control blocks,
//! synchronization objects and timers are preallocated from these numbers,
//! so no operation on a hot path allocates.

use crate::errors::{NkResult, ResourceError};

/// Default tick period in nanoseconds (1 µs).
pub const DEFAULT_TICK_NS: u64 = 1_000;

/// Default maximum number of threads, the root context included.
pub const DEFAULT_MAX_THREADS: usize = 64;

/// Default maximum number of events, semaphores and mutexes.
pub const DEFAULT_MAX_OBJECTS: usize = 256;

/// Name given to the context that creates the nucleus.
pub const ROOT_THREAD_NAME: &str = "root";

/// Construction-time parameters of a nucleus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NucleusConfig {
    /// Length of one nucleus tick in nanoseconds.
    pub tick_ns: u64,
    /// Thread table capacity, including the root context.
    pub max_threads: usize,
    /// Capacity of the synchronization object table.
    pub max_objects: usize,
}

impl NucleusConfig {
    pub fn new() -> Self {
        Self {
            tick_ns: DEFAULT_TICK_NS,
            max_threads: DEFAULT_MAX_THREADS,
            max_objects: DEFAULT_MAX_OBJECTS,
        }
    }

    pub fn tick_ns(mut self, tick_ns: u64) -> Self {
        self.tick_ns = tick_ns;
        self
    }

    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = max_objects;
        self
    }

    /// Reject configurations the nucleus cannot run with.
    ///
    /// The thread table must hold at least the root context plus one
    /// real-time thread, and ids are 32-bit.
    pub fn validate(&self) -> NkResult<()> {
        if self.tick_ns == 0
            || self.max_threads < 2
            || self.max_threads > u32::MAX as usize
            || self.max_objects > u32::MAX as usize
        {
            log::warn!("rejecting nucleus config {:?}", self);
            return Err(ResourceError::InvalidConfig.into());
        }
        Ok(())
    }

    /// Slots needed in the object table: user objects plus one exit
    /// object per thread (used by `thread_join`).
    pub(crate) fn object_slots(&self) -> usize {
        self.max_objects + self.max_threads
    }
}

impl Default for NucleusConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NucleusError;

    #[test]
    fn test_default_config_is_valid() {
        let config = NucleusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_ns, DEFAULT_TICK_NS);
        assert_eq!(config.object_slots(), DEFAULT_MAX_OBJECTS + DEFAULT_MAX_THREADS);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = NucleusConfig::new().tick_ns(0).validate().unwrap_err();
        assert_eq!(err, NucleusError::Resource(ResourceError::InvalidConfig));
        assert!(NucleusConfig::new().max_threads(1).validate().is_err());
        assert!(NucleusConfig::new().max_threads(2).max_objects(0).validate().is_ok());
    }
}
