//! Crate-level tests on the hosted port.

mod helpers;
