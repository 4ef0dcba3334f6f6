//! Receive-buffer sizing policy
//!
//! Computes the receive capacity of a connection from configuration and
//! enforces it when payloads are decoded.
//!
//! - fixed: `fixed_buffer_kb * 1024` bytes
//! - adaptive with a cap: `adaptive_cap_kb * 1024` bytes
//! - adaptive without a cap (`adaptive_cap_kb == 0`): no limit
//!
//! The transport owns the message bytes and is configured with the same limit
//! (`max_message_size`), so its read buffer grows on demand up to the cap and
//! is never preallocated. The unbounded case is reported as `usize::MAX` by
//! [`BufferCapacity::bytes`] but never allocated as such.

use std::borrow::Cow;

use crate::infrastructure::config::BufferConfig;
use crate::ws::WebSocketError;

/// Receive capacity derived from [`BufferConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferCapacity {
    /// Constant limit, never raised
    Fixed(usize),
    /// Transport buffer grows on demand up to the cap
    Capped(usize),
    /// Transport buffer grows on demand without limit
    Unbounded,
}

impl BufferCapacity {
    /// Evaluate the policy for one connection
    pub fn from_config(config: &BufferConfig) -> Self {
        if !config.use_adaptive_buffer {
            BufferCapacity::Fixed(config.fixed_buffer_kb.saturating_mul(1024))
        } else if config.adaptive_cap_kb > 0 {
            BufferCapacity::Capped(config.adaptive_cap_kb.saturating_mul(1024))
        } else {
            BufferCapacity::Unbounded
        }
    }

    /// Capacity in bytes; `usize::MAX` stands for "unbounded"
    #[inline]
    pub fn bytes(&self) -> usize {
        self.limit().unwrap_or(usize::MAX)
    }

    /// Largest accepted message, `None` when unbounded
    #[inline]
    pub fn limit(&self) -> Option<usize> {
        match *self {
            BufferCapacity::Fixed(bytes) | BufferCapacity::Capped(bytes) => Some(bytes),
            BufferCapacity::Unbounded => None,
        }
    }

    pub fn is_adaptive(&self) -> bool {
        !matches!(self, BufferCapacity::Fixed(_))
    }
}

impl From<&BufferConfig> for BufferCapacity {
    fn from(config: &BufferConfig) -> Self {
        BufferCapacity::from_config(config)
    }
}

/// Per-connection receive guard
///
/// One instance lives for the whole receive loop of a connection. Each
/// payload is checked against the capacity and decoded in place as UTF-8
/// (invalid sequences are replaced, binary frames are decoded the same way).
#[derive(Debug)]
pub struct ReceiveBuffer {
    capacity: BufferCapacity,
    /// Largest payload accepted so far
    high_water: usize,
}

impl ReceiveBuffer {
    pub fn new(capacity: BufferCapacity) -> Self {
        Self {
            capacity,
            high_water: 0,
        }
    }

    /// Decode `payload` as text without copying valid UTF-8
    ///
    /// # Errors
    /// Returns [`WebSocketError::MessageTooLarge`] when the payload exceeds the
    /// configured capacity.
    pub fn decode<'a>(&mut self, payload: &'a [u8]) -> Result<Cow<'a, str>, WebSocketError> {
        if let Some(limit) = self.capacity.limit() {
            if payload.len() > limit {
                return Err(WebSocketError::MessageTooLarge {
                    size: payload.len(),
                    limit,
                });
            }
        }

        self.high_water = self.high_water.max(payload.len());
        Ok(String::from_utf8_lossy(payload))
    }

    /// Size of the largest payload accepted so far
    #[inline]
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    #[inline]
    pub fn capacity(&self) -> BufferCapacity {
        self.capacity
    }
}
