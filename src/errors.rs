//! Error handling for the nucleus.
//!
//! Every primitive surfaces its exact outcome to the caller. Transient wait
//! outcomes, object lifecycle errors and contract violations are kept apart
//! so that a personality layer can decide whether to retry, translate the
//! error into its own code space, or escalate.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for nucleus operations.
pub type NkResult<T> = Result<T, NucleusError>;

/// Error type for every nucleus operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NucleusError {
    /// The request could not be satisfied immediately and the caller asked
    /// for non-blocking operation.
    WouldBlock,
    /// The request was not satisfied before its deadline.
    TimedOut,
    /// The caller was explicitly unblocked while waiting.
    Interrupted,
    /// The object was destroyed, before or while the caller was waiting.
    Removed,
    /// Release points of a periodic thread were missed.
    Overrun(u64),
    /// Programming error on the caller's side.
    Contract(ContractError),
    /// Storage exhaustion or invalid configuration.
    Resource(ResourceError),
}

/// Contract violations: the call itself was illegal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractError {
    /// A blocking service was called from interrupt context, from the root
    /// context, or with the scheduler locked.
    IllegalContext,
    /// The handle was never produced by this nucleus.
    InvalidHandle,
    /// The thread is not in a state that allows the transition.
    InvalidState,
    /// The priority is outside the real-time range.
    InvalidPriority(u8),
    /// The caller already owns the (non-recursive) mutex.
    Deadlock,
    /// The caller does not own the mutex it tries to release.
    NotOwner,
    /// `wait_period` was called by a thread without a period.
    NotPeriodic,
    /// The operation is not allowed on the calling thread itself.
    SelfTarget,
}

/// Resource errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// The thread table is full.
    TooManyThreads,
    /// The synchronization object table is full.
    TooManyObjects,
    /// The configuration was rejected at construction.
    InvalidConfig,
    /// The architecture layer could not provide an execution context.
    ContextUnavailable,
    /// A semaphore count would exceed `u32::MAX`.
    CountOverflow,
}

// errno values used by the driver-facing code space.
const EPERM: i32 = 1;
const EINTR: i32 = 4;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const EINVAL: i32 = 22;
const EDEADLK: i32 = 35;
const EIDRM: i32 = 43;
const EOVERFLOW: i32 = 75;
const EWOULDBLOCK: i32 = 11;
const ETIMEDOUT: i32 = 110;

impl NucleusError {
    /// Negative errno-style code of this error.
    pub fn code(&self) -> i32 {
        match self {
            NucleusError::WouldBlock => -EWOULDBLOCK,
            NucleusError::TimedOut | NucleusError::Overrun(_) => -ETIMEDOUT,
            NucleusError::Interrupted => -EINTR,
            NucleusError::Removed => -EIDRM,
            NucleusError::Contract(e) => match e {
                ContractError::IllegalContext | ContractError::NotOwner => -EPERM,
                ContractError::Deadlock => -EDEADLK,
                ContractError::InvalidState => -EBUSY,
                ContractError::InvalidHandle
                | ContractError::InvalidPriority(_)
                | ContractError::NotPeriodic
                | ContractError::SelfTarget => -EINVAL,
            },
            NucleusError::Resource(e) => match e {
                ResourceError::TooManyThreads
                | ResourceError::TooManyObjects
                | ResourceError::ContextUnavailable => -ENOMEM,
                ResourceError::InvalidConfig => -EINVAL,
                ResourceError::CountOverflow => -EOVERFLOW,
            },
        }
    }

    /// Whether this is a transient wait outcome (never fatal).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NucleusError::WouldBlock | NucleusError::TimedOut | NucleusError::Interrupted
        )
    }

    /// Whether this error reports a programming error of the caller.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, NucleusError::Contract(_))
    }
}

impl fmt::Display for NucleusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NucleusError::WouldBlock => write!(f, "Operation would block"),
            NucleusError::TimedOut => write!(f, "Wait timed out"),
            NucleusError::Interrupted => write!(f, "Wait interrupted"),
            NucleusError::Removed => write!(f, "Object removed"),
            NucleusError::Overrun(n) => write!(f, "Period overrun: {} release(s) missed", n),
            NucleusError::Contract(e) => write!(f, "Contract violation: {}", e),
            NucleusError::Resource(e) => write!(f, "Resource error: {}", e),
        }
    }
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractError::IllegalContext => write!(f, "Blocking call from a non-blocking context"),
            ContractError::InvalidHandle => write!(f, "Invalid handle"),
            ContractError::InvalidState => write!(f, "Thread in wrong state for this operation"),
            ContractError::InvalidPriority(p) => write!(f, "Invalid priority: {}", p),
            ContractError::Deadlock => write!(f, "Mutex already owned by caller"),
            ContractError::NotOwner => write!(f, "Mutex not owned by caller"),
            ContractError::NotPeriodic => write!(f, "Thread is not periodic"),
            ContractError::SelfTarget => write!(f, "Operation not allowed on the calling thread"),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::TooManyThreads => write!(f, "Maximum number of threads reached"),
            ResourceError::TooManyObjects => write!(f, "Maximum number of objects reached"),
            ResourceError::InvalidConfig => write!(f, "Invalid nucleus configuration"),
            ResourceError::ContextUnavailable => write!(f, "Execution context unavailable"),
            ResourceError::CountOverflow => write!(f, "Semaphore count overflow"),
        }
    }
}

impl From<ContractError> for NucleusError {
    fn from(error: ContractError) -> Self {
        NucleusError::Contract(error)
    }
}

impl From<ResourceError> for NucleusError {
    fn from(error: ResourceError) -> Self {
        NucleusError::Resource(error)
    }
}
