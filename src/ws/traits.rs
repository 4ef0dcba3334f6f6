//! Application callback surfaces
//!
//! Callbacks run inline on the connection's receive loop, so messages from one
//! connection are observed in arrival order. They must not block; hand long
//! work to a task or channel.

use crate::server::ServerClient;
use crate::ws::WebSocketError;

/// Events of a client session
///
/// Every method has an empty default so implementors pick what they need.
pub trait SessionHandler: Send + Sync + 'static {
    /// Transport handshake completed
    fn on_connect(&self) {}

    /// Connection closed, fired once per successful connect
    fn on_disconnect(&self) {}

    /// Text received (reserved probe replies are never passed here)
    fn on_message(&self, _text: &str) {}

    /// Connect or read failure
    fn on_error(&self, _error: &str) {}
}

/// Events of a listener
pub trait ListenerHandler: Send + Sync + 'static {
    /// Client accepted and registered
    fn on_client_connect(&self, _client: &ServerClient) {}

    /// Client closed and removed from the registry, fired once per client
    fn on_client_disconnect(&self, _client: &ServerClient) {}

    /// Text received from a client (reserved probes are never passed here)
    fn on_client_message(&self, _client: &ServerClient, _text: &str) {}

    /// Read failure on a client connection, followed by its disconnect
    fn on_client_error(&self, _client: &ServerClient, _error: &WebSocketError) {}
}

impl SessionHandler for () {}

impl ListenerHandler for () {}
