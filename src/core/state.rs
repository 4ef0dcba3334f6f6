//! Connection lifecycle state
//!
//! States are ordered `Connecting < Open < Closing < Closed` and a connection
//! only ever moves forward through them. The atomic holder is read by every
//! receive-loop iteration, so it stays lock-free.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Transport handshake in progress
    Connecting = 0,
    /// Connected and ready
    Open = 1,
    /// Close handshake started
    Closing = 2,
    /// Terminal
    Closed = 3,
}

impl ConnectionState {
    #[inline(always)]
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free, forward-only state cell
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline(always)]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it is later than the current state.
    ///
    /// Returns `true` when this call changed the state. Attempts to move
    /// backwards (e.g. Closed -> Open) are no-ops.
    #[inline]
    pub fn advance(&self, next: ConnectionState) -> bool {
        let previous = self.0.fetch_max(next as u8, Ordering::AcqRel);
        previous < next as u8
    }
}
