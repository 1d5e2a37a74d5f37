//! Preallocated storage for nucleus objects.
//!
//! Thread control blocks and synchronization objects live in fixed-size
//! pools; queues are intrusive lists over pool slots. Nothing here
//! allocates after construction.

pub mod list;
pub mod pool;

pub use list::{Link, List};
pub use pool::{ObjectPool, PoolError};
