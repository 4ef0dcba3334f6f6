//! Client-side session
//!
//! Owns at most one connection to a remote endpoint and surfaces its events
//! through a [`SessionHandler`].
//!
//! State machine: `Idle -> Connecting -> Open -> Closing -> Closed`. A failed
//! connect goes straight to `Closed` and fires `on_error`, never `on_connect`.
//! A session connects once; a second `connect` is rejected instead of racing a
//! second receive loop.
//!
//! The `connect`, `send` and `close` convenience variants return immediately:
//! the work runs as a background task on the current tokio runtime and any
//! failure is reported through `on_error`. The `*_async` variants await it.

use std::fmt;
use std::sync::{Arc, OnceLock};

use futures_util::{Sink, Stream};
use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::time::timeout;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::core::{BufferCapacity, ConnectionState, ReceiveBuffer};
use crate::infrastructure::config::Config;
use crate::log_ws;
use crate::ws::connection::{Connection, WebSocketError};
use crate::ws::ping::{KeepaliveHealth, PingHandler, PONG_PAYLOAD};
use crate::ws::receive::{receive_loop, LoopExit};
use crate::ws::traits::SessionHandler;
use crate::ws::transport::WireMessage;

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, never connected
    Idle,
    /// Transport handshake in progress
    Connecting,
    Open,
    Closing,
    /// Terminal
    Closed,
}

enum Phase {
    Idle,
    Connecting,
    Connected(Arc<Connection>),
    Closed,
}

struct SessionInner {
    url: String,
    config: Config,
    handler: Box<dyn SessionHandler>,
    phase: Mutex<Phase>,
    keepalive: PingHandler,
    cancel: CancellationToken,
    /// Runtime the session was connected on, for `ping_blocking`
    runtime: OnceLock<Handle>,
}

/// Client session handle
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

impl ClientSession {
    /// Create an idle session for `url` (`ws://` or `wss://`)
    pub fn new(url: impl Into<String>, config: Config, handler: impl SessionHandler) -> Self {
        let keepalive = PingHandler::with_timeout(config.pong_timeout());
        Self {
            inner: Arc::new(SessionInner {
                url: url.into(),
                config,
                handler: Box::new(handler),
                phase: Mutex::new(Phase::Idle),
                keepalive,
                cancel: CancellationToken::new(),
                runtime: OnceLock::new(),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> SessionState {
        match &*self.inner.phase.lock() {
            Phase::Idle => SessionState::Idle,
            Phase::Connecting => SessionState::Connecting,
            Phase::Connected(connection) => match connection.state() {
                ConnectionState::Connecting => SessionState::Connecting,
                ConnectionState::Open => SessionState::Open,
                ConnectionState::Closing => SessionState::Closing,
                ConnectionState::Closed => SessionState::Closed,
            },
            Phase::Closed => SessionState::Closed,
        }
    }

    /// Whether the connection is open
    pub fn is_alive(&self) -> bool {
        self.state() == SessionState::Open
    }

    fn connection(&self) -> Option<Arc<Connection>> {
        match &*self.inner.phase.lock() {
            Phase::Connected(connection) => Some(connection.clone()),
            _ => None,
        }
    }

    /// Runtime for background work: the one the session connected on, else
    /// the caller's
    fn background_runtime(&self) -> Option<Handle> {
        self.inner
            .runtime
            .get()
            .cloned()
            .or_else(|| Handle::try_current().ok())
    }

    /// Start connecting in the background
    ///
    /// Failures are reported through `on_error`. Outside a tokio runtime the
    /// attempt cannot start: `on_error` fires and the session stays idle.
    pub fn connect(&self) {
        let Some(runtime) = self.background_runtime() else {
            log_ws!(Level::WARN, url = %self.inner.url, "connect called outside a tokio runtime");
            self.inner
                .handler
                .on_error("error connecting: no tokio runtime available");
            return;
        };

        let session = self.clone();
        runtime.spawn(async move {
            if let Err(e) = session.connect_async().await {
                log_ws!(Level::DEBUG, url = %session.inner.url, "background connect ended: {}", e);
            }
        });
    }

    /// Connect and wait for the transport handshake
    ///
    /// On success `on_connect` has fired and the receive loop is running.
    /// # Errors
    /// `AlreadyStarted` if the session is not idle; otherwise the connect
    /// failure, which has also been passed to `on_error`.
    pub async fn connect_async(&self) -> crate::Result<()> {
        self.begin_connect()?;

        let capacity = BufferCapacity::from_config(&self.inner.config.buffer);
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = capacity.limit();
        ws_config.max_frame_size = capacity.limit();

        let attempt = timeout(
            self.inner.config.connect_timeout(),
            connect_async_with_config(self.inner.url.as_str(), Some(ws_config), true),
        );

        let outcome = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(WebSocketError::ConnectionClosed),
            result = attempt => match result {
                Ok(Ok((stream, _response))) => Ok(stream),
                Ok(Err(e)) => Err(WebSocketError::ConnectionFailed(e.to_string())),
                Err(_) => Err(WebSocketError::Timeout),
            },
        };

        match outcome {
            Ok(stream) => Ok(self.attach(stream)?),
            Err(e) => {
                *self.inner.phase.lock() = Phase::Closed;
                if !self.inner.cancel.is_cancelled() {
                    log_ws!(Level::WARN, url = %self.inner.url, "connect failed: {}", e);
                    self.inner.handler.on_error(&format!("error connecting: {}", e));
                }
                Err(e.into())
            }
        }
    }

    fn begin_connect(&self) -> Result<(), WebSocketError> {
        let mut phase = self.inner.phase.lock();
        match *phase {
            Phase::Idle => {
                *phase = Phase::Connecting;
                Ok(())
            }
            _ => Err(WebSocketError::AlreadyStarted),
        }
    }

    /// Promote a connecting session to open over an established socket
    fn attach<S, M, E>(&self, socket: S) -> Result<(), WebSocketError>
    where
        S: Stream<Item = Result<M, E>> + Sink<M, Error = E> + Send + 'static,
        M: WireMessage,
        E: fmt::Display + Send + 'static,
    {
        let mut phase = self.inner.phase.lock();
        if !matches!(*phase, Phase::Connecting) {
            // Closed while the handshake was in flight
            return Err(WebSocketError::ConnectionClosed);
        }

        let _ = self.inner.runtime.set(Handle::current());
        let (connection, reader) = Connection::open(socket, self.inner.cancel.child_token());
        *phase = Phase::Connected(connection.clone());
        drop(phase);

        log_ws!(Level::INFO, id = %connection.id(), url = %self.inner.url, "connected");
        self.inner.handler.on_connect();

        let inner = self.inner.clone();
        let runtime = connection.runtime().clone();
        runtime.spawn(async move { inner.run(connection, reader).await });
        Ok(())
    }

    /// Queue a text message; dropped if the session is not open
    pub fn send(&self, text: impl Into<String>) {
        if let Some(connection) = self.connection() {
            connection.send(text);
        }
    }

    /// Send a text message and wait until it has been written
    pub async fn send_async(&self, text: impl Into<String>) -> Result<(), WebSocketError> {
        match self.connection() {
            Some(connection) => connection.send_async(text).await,
            None => Err(WebSocketError::NotConnected),
        }
    }

    /// Close in the background
    ///
    /// Callable from any thread: the close runs on the session's runtime. A
    /// session that never connected has no runtime and closes immediately.
    pub fn close(&self) {
        match self.background_runtime() {
            Some(runtime) => {
                let session = self.clone();
                runtime.spawn(async move { session.close_async().await });
            }
            None => self.close_unconnected(),
        }
    }

    /// Close a session that never reached Connected
    fn close_unconnected(&self) {
        {
            let mut phase = self.inner.phase.lock();
            if matches!(*phase, Phase::Idle | Phase::Connecting) {
                *phase = Phase::Closed;
            }
        }
        self.inner.cancel.cancel();
    }

    /// Close gracefully; safe to call any number of times
    ///
    /// `on_disconnect` fires once from the receive loop after the close.
    pub async fn close_async(&self) {
        let connection = {
            let mut phase = self.inner.phase.lock();
            match &*phase {
                Phase::Connected(connection) => Some(connection.clone()),
                Phase::Idle | Phase::Connecting => {
                    *phase = Phase::Closed;
                    None
                }
                Phase::Closed => None,
            }
        };

        if let Some(connection) = connection {
            connection.close("Bye").await;
        }
        self.inner.cancel.cancel();
    }

    /// Alias of [`close`](Self::close)
    pub fn stop(&self) {
        self.close();
    }

    /// Alias of [`close_async`](Self::close_async)
    pub async fn stop_async(&self) {
        self.close_async().await;
    }

    /// Measure the round trip to the listener in milliseconds
    ///
    /// `None` when the session is not open or no pong arrived in time.
    pub async fn ping(&self) -> Option<u64> {
        let connection = self.connection()?;
        self.inner.keepalive.probe(&connection).await
    }

    /// Blocking variant of [`ping`](Self::ping)
    ///
    /// Runs the probe on the runtime the session was connected on. Returns
    /// `None` when called from a current-thread runtime, where blocking
    /// would stall the receive loop that delivers the pong.
    pub fn ping_blocking(&self) -> Option<u64> {
        let handle = self.inner.runtime.get()?.clone();
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(self.ping()))
            }
            Ok(_) => {
                log_ws!(Level::WARN, "ping_blocking called from a current-thread runtime");
                None
            }
            Err(_) => handle.block_on(self.ping()),
        }
    }

    pub fn keepalive_health(&self) -> KeepaliveHealth {
        self.inner.keepalive.health()
    }

    #[cfg(test)]
    pub(crate) fn connect_with<S, M, E>(&self, socket: S) -> Result<(), WebSocketError>
    where
        S: Stream<Item = Result<M, E>> + Sink<M, Error = E> + Send + 'static,
        M: WireMessage,
        E: fmt::Display + Send + 'static,
    {
        self.begin_connect()?;
        self.attach(socket)
    }
}

impl SessionInner {
    async fn run<R, M, E>(self: Arc<Self>, connection: Arc<Connection>, reader: R)
    where
        R: Stream<Item = Result<M, E>> + Unpin,
        M: WireMessage,
        E: fmt::Display,
    {
        let mut buffer = ReceiveBuffer::new(BufferCapacity::from_config(&self.config.buffer));

        let exit = receive_loop(&connection, reader, &mut buffer, |text| {
            if text == PONG_PAYLOAD {
                self.keepalive.record_pong();
            } else {
                self.handler.on_message(text);
            }
        })
        .await;

        if let LoopExit::Failed(e) = &exit {
            log_ws!(Level::WARN, id = %connection.id(), "receive failed: {}", e);
            self.handler.on_error(&e.to_string());
        }

        connection.close("Bye").await;
        log_ws!(Level::INFO, id = %connection.id(), ?exit, "disconnected");
        self.handler.on_disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_quiet, next_event, ws_pair, RecordingSession, SessionEvent};
    use crate::WsLinkError;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_tungstenite::tungstenite::Message;

    async fn open_session() -> (
        ClientSession,
        UnboundedReceiver<SessionEvent>,
        tokio_tungstenite::WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (local, peer) = ws_pair().await;
        let (handler, mut events) = RecordingSession::new();
        let session = ClientSession::new("ws://in-memory/", Config::default(), handler);
        session.connect_with(local).unwrap();
        assert_eq!(next_event(&mut events).await, SessionEvent::Connect);
        (session, events, peer)
    }

    /// Answer pings with "Pong" like the listener does, after a per-ping
    /// delay (`None` = never answer)
    fn spawn_pong_peer(
        mut peer: tokio_tungstenite::WebSocketStream<tokio::io::DuplexStream>,
        reply_delay: impl Fn(usize) -> Option<Duration> + Send + 'static,
    ) {
        tokio::spawn(async move {
            let mut pings = 0;
            while let Some(Ok(message)) = peer.next().await {
                if message.to_text().map(|t| t == "ping").unwrap_or(false) {
                    pings += 1;
                    let Some(delay) = reply_delay(pings) else {
                        continue;
                    };
                    tokio::time::sleep(delay).await;
                    if peer.send(Message::text("Pong")).await.is_err() {
                        break;
                    }
                }
            }
        });
    }

    #[tokio::test]
    async fn test_connect_failure_fires_error_only() {
        let (handler, mut events) = RecordingSession::new();
        let session = ClientSession::new("ws://127.0.0.1:1/", Config::default(), handler);

        let result = session.connect_async().await;
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Closed);

        match next_event(&mut events).await {
            SessionEvent::Error(message) => assert!(message.starts_with("error connecting")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_quiet(&mut events, Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let (session, mut events, _peer) = open_session().await;

        let err = session.connect_async().await.unwrap_err();
        assert!(matches!(
            err,
            WsLinkError::WebSocket(WebSocketError::AlreadyStarted)
        ));
        assert_eq!(session.state(), SessionState::Open);
        assert_quiet(&mut events, Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_messages_delivered_and_pong_swallowed() {
        let (session, mut events, mut peer) = open_session().await;

        peer.send(Message::text("Pong")).await.unwrap();
        peer.send(Message::text("hello")).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::Message("hello".to_string())
        );
        assert!(session.is_alive());
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (session, _events, mut peer) = open_session().await;

        session.send("fire-and-forget");
        session.send_async("awaited").await.unwrap();

        assert_eq!(peer.next().await.unwrap().unwrap(), Message::text("fire-and-forget"));
        assert_eq!(peer.next().await.unwrap().unwrap(), Message::text("awaited"));
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (session, mut events, peer) = open_session().await;
        spawn_pong_peer(peer, |_| Some(Duration::ZERO));

        let rtt = session.ping().await.expect("pong expected");
        assert!(rtt < PING_TIMEOUT_MS);
        assert_eq!(session.keepalive_health().last_rtt_ms, Some(rtt));
        assert_quiet(&mut events, Duration::from_millis(50)).await;
    }

    const PING_TIMEOUT_MS: u64 = 5_000;

    #[tokio::test(start_paused = true)]
    async fn test_ping_without_answer_times_out() {
        let (session, _events, peer) = open_session().await;
        spawn_pong_peer(peer, |_| None);

        let start = tokio::time::Instant::now();
        assert_eq!(session.ping().await, None);
        assert!(start.elapsed() >= Duration::from_millis(PING_TIMEOUT_MS));
        assert_eq!(session.keepalive_health().missed_pongs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_pong_does_not_answer_next_ping() {
        let (session, mut events, peer) = open_session().await;
        // First pong lands at t=6s, after its ping gave up at t=5s.
        // The second ping goes out at t=5s and is answered at t=8s.
        spawn_pong_peer(peer, |n| {
            Some(if n == 1 {
                Duration::from_secs(6)
            } else {
                Duration::from_secs(2)
            })
        });

        assert_eq!(session.ping().await, None);
        assert_eq!(session.keepalive_health().missed_pongs, 1);

        let rtt = session.ping().await.expect("second ping answered");
        assert!(rtt >= 3_000, "late pong resolved the new ping after {rtt}ms");
        assert!(rtt < PING_TIMEOUT_MS);
        assert_eq!(session.keepalive_health().missed_pongs, 0);

        // Neither pong surfaced as a message
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_requires_open_session() {
        let session = ClientSession::new("ws://in-memory/", Config::default(), ());
        assert_eq!(session.ping().await, None);
        assert_eq!(session.send_async("x").await, Err(WebSocketError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_twice_single_disconnect() {
        let (session, mut events, _peer) = open_session().await;

        session.close_async().await;
        session.close_async().await;
        session.stop();

        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnect);
        assert_quiet(&mut events, Duration::from_millis(200)).await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_peer_close_fires_disconnect_once() {
        let (session, mut events, mut peer) = open_session().await;

        peer.send(Message::Close(None)).await.unwrap();

        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnect);
        assert_quiet(&mut events, Duration::from_millis(200)).await;
        assert!(!session.is_alive());
    }

    #[tokio::test]
    async fn test_oversized_message_reports_error_then_disconnect() {
        let (local, mut peer) = ws_pair().await;
        let (handler, mut events) = RecordingSession::new();
        let mut config = Config::default();
        config.buffer.use_adaptive_buffer = false;
        config.buffer.fixed_buffer_kb = 1;
        let session = ClientSession::new("ws://in-memory/", config, handler);
        session.connect_with(local).unwrap();
        assert_eq!(next_event(&mut events).await, SessionEvent::Connect);

        peer.send(Message::text("x".repeat(2048))).await.unwrap();

        match next_event(&mut events).await {
            SessionEvent::Error(message) => assert!(message.contains("exceeds")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnect);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_from_plain_thread() {
        let (session, mut events, peer) = open_session().await;
        spawn_pong_peer(peer, |_| Some(Duration::ZERO));

        let remote = session.clone();
        let rtt = std::thread::spawn(move || {
            let rtt = remote.ping_blocking();
            remote.close();
            rtt
        })
        .join()
        .unwrap();
        assert!(rtt.is_some());

        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnect);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_background_calls_without_runtime() {
        let (handler, mut events) = RecordingSession::new();
        let session = ClientSession::new("ws://127.0.0.1:1/", Config::default(), handler);

        session.connect();
        match events.try_recv() {
            Ok(SessionEvent::Error(message)) => assert!(message.contains("no tokio runtime")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Idle);

        session.stop();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_before_connect() {
        let (handler, mut events) = RecordingSession::new();
        let session = ClientSession::new("ws://127.0.0.1:1/", Config::default(), handler);

        session.close_async().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.connect_async().await.is_err());
        assert_quiet(&mut events, Duration::from_millis(50)).await;
    }
}
