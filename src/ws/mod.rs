//! WebSocket connections and the client-side session

pub mod client;
pub mod connection;
pub mod ping;
pub mod receive;
pub mod traits;
pub mod transport;

pub use crate::core::ConnectionState;
pub use client::{ClientSession, SessionState};
pub use connection::{Connection, ConnectionId, WebSocketError};
pub use ping::{KeepaliveHealth, PingHandler, PongOutcome, PING_PAYLOAD, PING_TIMEOUT, PONG_PAYLOAD};
pub use receive::LoopExit;
pub use traits::{ListenerHandler, SessionHandler};
pub use transport::{Inbound, WireMessage};
