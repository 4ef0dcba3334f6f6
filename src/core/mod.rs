//! Core types shared by the client and server sides
//!
//! This module contains the fundamental building blocks:
//! - BufferCapacity / ReceiveBuffer: receive-buffer sizing policy
//! - ConnectionState / AtomicState: forward-only connection lifecycle

pub mod buffer;
pub mod state;

pub use buffer::{BufferCapacity, ReceiveBuffer};
pub use state::{AtomicState, ConnectionState};
