//! Message-oriented WebSocket sessions and listeners
//!
//! Core library for text-message exchange over established WebSocket links:
//! a client-side session with a latency probe, and a listener that keeps a
//! registry of connected clients and can broadcast to all of them.

pub mod core;
pub mod infrastructure;
pub mod server;
pub mod ws;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use infrastructure::config::{BufferConfig, ClientConfig, Config, KeepaliveConfig, ServerConfig};
pub use server::{BroadcastReport, ClientRegistry, Listener, ServerClient};
pub use ws::{ClientSession, ConnectionId, ConnectionState, ListenerHandler, SessionHandler, WebSocketError};

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum WsLinkError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WebSocketError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WsLinkError>;
