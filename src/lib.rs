#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

//! Real-time execution nucleus.
//!
//! A small `no_std` core that drivers and personality layers build on: a
//! priority-preemptive scheduler for real-time threads, events, counting
//! semaphores, mutexes with priority inheritance, periodic threads and
//! timeout sequences spanning several waits.
//!
//! # Execution model
//!
//! One CPU, one global lock that masks interrupts. The context that builds
//! the [`Nucleus`] becomes its root thread: it runs below every real-time
//! priority whenever no real-time thread is ready, and may never block.
//! Interrupt handlers bracket their work with [`Nucleus::irq_enter`] and
//! [`Nucleus::irq_exit`]; wakeups they cause are acted upon at the
//! outermost exit.
//!
//! Hardware access goes through the [`Arch`] trait. The `std-shim` feature
//! provides [`HostArch`], which runs each nucleus thread on an OS thread
//! with exactly one of them allowed to execute at a time, on a virtual
//! clock driven by [`Nucleus::advance_time`].
//!
//! # Quick Start
//!
//! ```ignore
//! use rt_nucleus::{HostArch, Nucleus, NucleusConfig, ThreadBuilder};
//!
//! let nk = Nucleus::<HostArch>::new(HostArch::new(), NucleusConfig::new())?;
//! let ready = nk.sem_init(0)?;
//!
//! let nk2 = nk.clone();
//! let consumer = ThreadBuilder::new()
//!     .name("consumer")
//!     .priority(20)
//!     .spawn(&nk, move || {
//!         while nk2.sem_down(ready).is_ok() { /* handle one item */ }
//!     })?;
//!
//! nk.with_irq_context(|| nk.sem_up(ready))?;
//! ```
//!
//! # Features
//!
//! - `std-shim`: hosted port and the `HostArch` simulation

extern crate alloc;

#[cfg(any(test, feature = "std-shim"))]
extern crate std;

pub mod arch;
pub mod config;
pub mod errors;
pub mod kernel;
pub mod lock;
pub mod mem;
pub mod sched;
pub(crate) mod state;
pub mod synch;
pub mod thread;
pub mod time;

#[cfg(test)]
mod tests;

// ============================================================================
// Public API
// ============================================================================

pub use arch::Arch;
#[cfg(any(test, feature = "std-shim"))]
pub use arch::host::HostArch;

pub use config::NucleusConfig;
pub use errors::{ContractError, NkResult, NucleusError, ResourceError};
pub use kernel::Nucleus;

pub use sched::{priority, RoundRobinScheduler, Scheduler};

pub use synch::{EventHandle, MutexHandle, SemHandle, SynchId};
pub use thread::{BlockReason, JoinHandle, PendFlags, ThreadBuilder, ThreadId, ThreadState};

pub use time::{Duration, Instant, Timeout, TimeoutSeq};
