//! Core types and synchronization primitives for loadable modules.
//!
//! This crate holds the pieces every module and host shares: the leveled
//! kernel logging facade, device-number identifiers, the exclusive-open
//! gate and the fixed-capacity session buffer.
//!
//! Nothing here allocates, so it builds for `no_std` targets and is tested
//! with `cargo test` (and loom, under `--cfg loom`) on the host.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod buffer;
pub mod id;
pub mod log;
pub mod sync;
