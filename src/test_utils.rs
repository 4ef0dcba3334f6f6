//! Test utilities: in-memory sockets and recording handlers

use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::server::ServerClient;
use crate::ws::connection::{Connection, ConnectionId, WebSocketError};
use crate::ws::traits::{ListenerHandler, SessionHandler};

pub type TestSocket = WebSocketStream<DuplexStream>;

/// Connected WebSocket pair over an in-memory pipe: (client role, server role)
pub async fn ws_pair() -> (TestSocket, TestSocket) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    tokio::join!(
        WebSocketStream::from_raw_socket(a, Role::Client, None),
        WebSocketStream::from_raw_socket(b, Role::Server, None),
    )
}

/// Accepted-client handle over an in-memory pipe, plus the remote peer
///
/// No receive loop runs for the client.
pub async fn server_client_pair() -> (ServerClient, TestSocket) {
    let (peer, local) = ws_pair().await;
    let (connection, _reader) = Connection::open(local, CancellationToken::new());
    (ServerClient::new(connection, None), peer)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connect,
    Disconnect,
    Message(String),
    Error(String),
}

/// Session handler that forwards every event to a channel
pub struct RecordingSession {
    tx: UnboundedSender<SessionEvent>,
}

impl RecordingSession {
    pub fn new() -> (Self, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionHandler for RecordingSession {
    fn on_connect(&self) {
        let _ = self.tx.send(SessionEvent::Connect);
    }

    fn on_disconnect(&self) {
        let _ = self.tx.send(SessionEvent::Disconnect);
    }

    fn on_message(&self, text: &str) {
        let _ = self.tx.send(SessionEvent::Message(text.to_string()));
    }

    fn on_error(&self, error: &str) {
        let _ = self.tx.send(SessionEvent::Error(error.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Connect(ConnectionId),
    Disconnect(ConnectionId),
    Message(ConnectionId, String),
    Error(ConnectionId, String),
}

/// Listener handler that forwards every event to a channel
pub struct RecordingListener {
    tx: UnboundedSender<ListenerEvent>,
}

impl RecordingListener {
    pub fn new() -> (Self, UnboundedReceiver<ListenerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ListenerHandler for RecordingListener {
    fn on_client_connect(&self, client: &ServerClient) {
        let _ = self.tx.send(ListenerEvent::Connect(client.id()));
    }

    fn on_client_disconnect(&self, client: &ServerClient) {
        let _ = self.tx.send(ListenerEvent::Disconnect(client.id()));
    }

    fn on_client_message(&self, client: &ServerClient, text: &str) {
        let _ = self
            .tx
            .send(ListenerEvent::Message(client.id(), text.to_string()));
    }

    fn on_client_error(&self, client: &ServerClient, error: &WebSocketError) {
        let _ = self
            .tx
            .send(ListenerEvent::Error(client.id(), error.to_string()));
    }
}

/// Next event, failing the test after five seconds
pub async fn next_event<T>(rx: &mut UnboundedReceiver<T>) -> T {
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event channel closed"),
        Err(_) => panic!("no event within 5s"),
    }
}

/// Assert that no event arrives within `window`
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<T>, window: Duration) {
    if let Ok(Some(event)) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}
