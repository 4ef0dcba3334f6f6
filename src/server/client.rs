//! Accepted client connection

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::ConnectionState;
use crate::ws::connection::{Connection, ConnectionId, WebSocketError};

/// One client accepted by a listener
///
/// Cheap to clone. Pairs the connection with the cancellation scope it was
/// accepted under (a child of the listener's scope).
#[derive(Clone)]
pub struct ServerClient {
    connection: Arc<Connection>,
    remote: Option<SocketAddr>,
}

impl ServerClient {
    pub(crate) fn new(connection: Arc<Connection>, remote: Option<SocketAddr>) -> Self {
        Self { connection, remote }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Cancellation scope this client was accepted under
    pub fn token(&self) -> &CancellationToken {
        self.connection.token()
    }

    /// Queue a text message without waiting for the write
    pub fn send(&self, text: impl Into<String>) {
        self.connection.send(text);
    }

    /// Send a text message and wait until it has been written
    pub async fn send_async(&self, text: impl Into<String>) -> Result<(), WebSocketError> {
        self.connection.send_async(text).await
    }

    /// Close in the background
    ///
    /// Runs on the connection's runtime; callable from any thread.
    pub fn close(&self, reason: &str) {
        let client = self.clone();
        let reason = reason.to_string();
        self.connection.runtime().spawn(async move {
            client.close_async(&reason).await;
        });
    }

    /// Close gracefully; returns `false` if the client was already closing
    ///
    /// Registry removal and `on_client_disconnect` follow from the client's
    /// receive loop.
    pub async fn close_async(&self, reason: &str) -> bool {
        self.connection.close(reason).await
    }
}

impl PartialEq for ServerClient {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ServerClient {}

impl fmt::Debug for ServerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerClient")
            .field("id", &self.id())
            .field("remote", &self.remote)
            .field("state", &self.state())
            .finish()
    }
}
