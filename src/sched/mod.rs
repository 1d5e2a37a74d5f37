//! Thread scheduler implementations.
//!
//! Provides the fixed-priority round-robin ready queue.

pub mod rr;
pub mod trait_def;

pub use rr::RoundRobinScheduler;
pub use trait_def::{priority, Placement, Scheduler};
