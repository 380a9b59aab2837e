//! Loom compatibility shim.
//!
//! Under `cfg(loom)` the atomics come from loom so the gate and stop flag
//! can be model-checked; otherwise they are the `core` atomics.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
