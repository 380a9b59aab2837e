//! Single-opener admission gate.
//!
//! [`ExclusivityGate`] is the `already_open` flag of a character device:
//! opening is one compare-and-exchange from [`GateState::NotUsed`] to
//! [`GateState::ExclusiveOpen`], and closing is an unconditional store back.
//! A failed exchange means another session holds the device and is reported
//! as [`Busy`] without blocking.

use core::fmt;

use super::loom_compat::{AtomicU8, Ordering};

/// The two states of an [`ExclusivityGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateState {
    /// No session holds the device.
    NotUsed = 0,
    /// Exactly one session holds the device.
    ExclusiveOpen = 1,
}

impl GateState {
    const fn from_u8(val: u8) -> Self {
        if val == Self::NotUsed as u8 {
            Self::NotUsed
        } else {
            Self::ExclusiveOpen
        }
    }
}

/// Returned by [`ExclusivityGate::try_open`] when the device is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Busy;

impl fmt::Display for Busy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("device or resource busy")
    }
}

/// Proof of a successful [`ExclusivityGate::try_open`].
///
/// Not `Clone`: only the session that won the exchange can hand it back to
/// [`ExclusivityGate::close`].
#[must_use = "dropping a ticket without closing leaves the device busy"]
#[derive(Debug)]
pub struct GateTicket {
    _private: (),
}

/// Lock-free at-most-one-opener flag.
pub struct ExclusivityGate {
    state: AtomicU8,
}

impl Default for ExclusivityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ExclusivityGate {
    /// Creates a gate in the [`GateState::NotUsed`] state.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(GateState::NotUsed as u8),
        }
    }

    /// Attempts to take exclusive ownership of the device.
    ///
    /// Never blocks and never retries: a concurrent holder yields [`Busy`].
    ///
    /// # Errors
    ///
    /// Returns [`Busy`] if another session currently holds the gate.
    pub fn try_open(&self) -> Result<GateTicket, Busy> {
        self.state
            .compare_exchange(
                GateState::NotUsed as u8,
                GateState::ExclusiveOpen as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .map(|_| GateTicket { _private: () })
            .map_err(|_| Busy)
    }

    /// Releases the gate held by `ticket`.
    pub fn close(&self, ticket: GateTicket) {
        let GateTicket { _private: () } = ticket;
        self.state.store(GateState::NotUsed as u8, Ordering::Release);
    }

    /// Returns the current state. Only a snapshot: it may change immediately.
    pub fn state(&self) -> GateState {
        GateState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Returns `true` if a session currently holds the gate.
    pub fn is_open(&self) -> bool {
        self.state() == GateState::ExclusiveOpen
    }
}

impl fmt::Debug for ExclusivityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusivityGate")
            .field("state", &self.state())
            .finish()
    }
}
