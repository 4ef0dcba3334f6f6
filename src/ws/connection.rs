//! Connection handle
//!
//! Wraps one established WebSocket link, whichever side produced it.
//! - Writes are serialized by a dedicated writer task fed through a channel
//! - `send` enqueues and returns, `send_async` waits for the flush
//! - `close` runs at most once, however many paths trigger it
//! - Each connection carries its own cancellation scope

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::core::{AtomicState, ConnectionState};
use crate::log_ws;
use crate::ws::transport::WireMessage;

/// How long `close` waits for the close frame to be flushed
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Process-wide connection id counter
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors that can occur with WebSocket connections
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebSocketError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
    #[error("Message of {size} bytes exceeds the {limit} byte receive buffer")]
    MessageTooLarge { size: usize, limit: usize },
    #[error("Timeout")]
    Timeout,
    #[error("Not connected")]
    NotConnected,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Already started")]
    AlreadyStarted,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WebSocketError>;

type Completion = oneshot::Sender<Result<()>>;

/// Work item for the writer task
#[derive(Debug)]
enum Outbound {
    Text {
        text: String,
        done: Option<Completion>,
    },
    Close {
        reason: String,
        done: Option<Completion>,
    },
}

/// Handle to one established connection
///
/// Shared behind an `Arc` between the receive loop, the owner (session or
/// registry) and the application.
pub struct Connection {
    id: ConnectionId,
    state: AtomicState,
    close_started: AtomicBool,
    outbound: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    /// Runtime running the writer task
    runtime: Handle,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state.load())
            .finish()
    }
}

impl Connection {
    /// Take ownership of an established socket
    ///
    /// Spawns the writer task on the current runtime and hands back the read
    /// half, which belongs to the connection's single receive loop. Must be
    /// called from within a runtime.
    pub(crate) fn open<S, M, E>(socket: S, cancel: CancellationToken) -> (Arc<Self>, SplitStream<S>)
    where
        S: Stream<Item = std::result::Result<M, E>> + Sink<M, Error = E> + Send + 'static,
        M: WireMessage,
        E: fmt::Display + Send + 'static,
    {
        let (sink, stream) = socket.split();
        let (outbound, rx) = mpsc::unbounded_channel();
        let runtime = Handle::current();

        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            state: AtomicState::new(ConnectionState::Open),
            close_started: AtomicBool::new(false),
            outbound,
            cancel,
            runtime,
        });

        connection.runtime.spawn(run_writer(connection.id, sink, rx));

        (connection, stream)
    }

    #[inline(always)]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline(always)]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    #[inline(always)]
    pub fn is_open(&self) -> bool {
        self.state.load() == ConnectionState::Open
    }

    /// Cancellation scope of this connection
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runtime the connection was opened on
    ///
    /// Background work for this connection is spawned here, so it can be
    /// started from threads outside the runtime.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Queue a text message without waiting for it to be written
    ///
    /// Sends on a connection that is not open are dropped.
    pub fn send(&self, text: impl Into<String>) {
        if !self.is_open() {
            log_ws!(Level::TRACE, id = %self.id, "dropping send on non-open connection");
            return;
        }
        let _ = self.outbound.send(Outbound::Text {
            text: text.into(),
            done: None,
        });
    }

    /// Send a text message and wait until it has been flushed
    pub async fn send_async(&self, text: impl Into<String>) -> Result<()> {
        if !self.is_open() {
            return Err(WebSocketError::NotConnected);
        }

        let (done, written) = oneshot::channel();
        self.outbound
            .send(Outbound::Text {
                text: text.into(),
                done: Some(done),
            })
            .map_err(|_| WebSocketError::NotConnected)?;

        written.await.map_err(|_| WebSocketError::ConnectionClosed)?
    }

    /// Close the connection gracefully
    ///
    /// Sends a normal-closure frame, waits (bounded) for it to be flushed,
    /// marks the connection Closed and cancels its scope so the receive loop
    /// exits. Returns `true` only for the call that actually closed it.
    pub async fn close(&self, reason: &str) -> bool {
        if self.close_started.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.advance(ConnectionState::Closing);

        let (done, flushed) = oneshot::channel();
        let queued = self
            .outbound
            .send(Outbound::Close {
                reason: reason.to_string(),
                done: Some(done),
            })
            .is_ok();
        if queued {
            match timeout(CLOSE_FLUSH_TIMEOUT, flushed).await {
                Ok(Ok(Err(e))) => {
                    log_ws!(Level::DEBUG, id = %self.id, "close frame not delivered: {}", e)
                }
                Err(_) => log_ws!(Level::DEBUG, id = %self.id, "close frame flush timed out"),
                _ => {}
            }
        }

        self.state.advance(ConnectionState::Closed);
        self.cancel.cancel();
        true
    }
}

/// Writer task: owns the sink half and writes queued messages in order
async fn run_writer<W, M>(id: ConnectionId, mut sink: W, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    W: Sink<M> + Unpin,
    W::Error: fmt::Display,
    M: WireMessage,
{
    while let Some(item) = rx.recv().await {
        let (message, done, closing) = match item {
            Outbound::Text { text, done } => (M::text(text), done, false),
            Outbound::Close { reason, done } => (M::close(reason), done, true),
        };

        let result = sink
            .send(message)
            .await
            .map_err(|e| WebSocketError::SendFailed(e.to_string()));
        let failed = result.is_err();
        if let Err(e) = &result {
            log_ws!(Level::DEBUG, %id, "write failed: {}", e);
        }
        if let Some(done) = done {
            let _ = done.send(result);
        }

        if closing || failed {
            break;
        }
    }
}
