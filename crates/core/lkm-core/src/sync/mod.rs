//! Synchronization primitives shared by modules and hosts.
//!
//! [`ExclusivityGate`] admits at most one open session at a time and
//! [`StopFlag`] carries a cooperative stop request to a background worker.

mod gate;
mod stop;

pub(crate) mod loom_compat;

pub use gate::{Busy, ExclusivityGate, GateState, GateTicket};
pub use stop::StopFlag;
