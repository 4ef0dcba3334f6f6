//! WebSocket listener
//!
//! Accepts upgrade requests on one address and path, runs one receive loop per
//! accepted client, keeps the client registry and answers probes with the
//! reserved reply.
//!
//! Lifecycle per client:
//! 1. Upgrade accepted, client registered, `on_client_connect`
//! 2. Messages delivered in arrival order through `on_client_message`
//! 3. Loop ends (peer close, read failure, cancellation); the connection is
//!    closed, the client removed and `on_client_disconnect` fired once
//!
//! Stopping a listener cancels its scope: the accept loop and every client
//! loop wind down. The process is never terminated.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Level;

use crate::core::{BufferCapacity, ReceiveBuffer};
use crate::infrastructure::config::Config;
use crate::infrastructure::metrics::{LinkMetrics, MetricsSnapshot};
use crate::log_server;
use crate::server::client::ServerClient;
use crate::server::endpoint::Endpoint;
use crate::server::registry::{BroadcastReport, ClientRegistry};
use crate::ws::connection::{Connection, ConnectionId, WebSocketError};
use crate::ws::ping::{PING_PAYLOAD, PONG_PAYLOAD};
use crate::ws::receive::{receive_loop, LoopExit};
use crate::ws::traits::ListenerHandler;

/// Upper bound on how long `stop` waits for client loops to finish
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct ListenerShared {
    url: String,
    config: Config,
    capacity: BufferCapacity,
    handler: Box<dyn ListenerHandler>,
    registry: ClientRegistry,
    metrics: LinkMetrics,
    cancel: CancellationToken,
    clients: TaskTracker,
    started: AtomicBool,
    alive: AtomicBool,
}

impl ListenerShared {
    async fn broadcast(&self, message: &str) -> BroadcastReport {
        let report = self.registry.broadcast(message).await;
        self.metrics.record_broadcast(report.delivered);
        log_server!(Level::DEBUG, ?report, "broadcast");
        report
    }
}

/// WebSocket server endpoint
pub struct Listener {
    shared: Arc<ListenerShared>,
    task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    /// Runtime the listener was started on
    runtime: OnceLock<Handle>,
}

impl Listener {
    /// Create a stopped listener for `url`, e.g. `ws://0.0.0.0:8080/`
    pub fn new(url: impl Into<String>, config: Config, handler: impl ListenerHandler) -> Self {
        let capacity = BufferCapacity::from_config(&config.buffer);
        Self {
            shared: Arc::new(ListenerShared {
                url: url.into(),
                config,
                capacity,
                handler: Box::new(handler),
                registry: ClientRegistry::new(),
                metrics: LinkMetrics::new(),
                cancel: CancellationToken::new(),
                clients: TaskTracker::new(),
                started: AtomicBool::new(false),
                alive: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
            local_addr: Mutex::new(None),
            runtime: OnceLock::new(),
        }
    }

    /// Listener bound to `config.server.url`
    pub fn from_config(config: Config, handler: impl ListenerHandler) -> Self {
        let url = config.server.url.clone();
        Self::new(url, config, handler)
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Bind and start accepting clients
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested. A listener starts once; later calls fail with
    /// `AlreadyStarted`. A failed start (bad address, bind error) may be
    /// retried.
    pub async fn start(&self) -> crate::Result<SocketAddr> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(WebSocketError::AlreadyStarted.into());
        }

        let (listener, endpoint) = match self.bind().await {
            Ok(bound) => bound,
            Err(e) => {
                self.shared.started.store(false, Ordering::Release);
                log_server!(Level::ERROR, url = %self.shared.url, "listener failed to start: {}", e);
                return Err(e);
            }
        };
        let addr = listener.local_addr()?;

        let app = Router::new()
            .route(&endpoint.path, any(accept))
            .route(&endpoint.subpaths(), any(accept))
            .with_state(self.shared.clone());

        let shared = self.shared.clone();
        let shutdown = self.shared.cancel.clone();
        let task = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await });

            if let Err(e) = server.await {
                log_server!(Level::ERROR, "accept loop failed: {}", e);
            }
            shared.alive.store(false, Ordering::Release);
        });

        let _ = self.runtime.set(Handle::current());
        *self.local_addr.lock() = Some(addr);
        *self.task.lock() = Some(task);
        self.shared.alive.store(true, Ordering::Release);
        log_server!(Level::INFO, %addr, path = %endpoint.path, "listening");

        Ok(addr)
    }

    async fn bind(&self) -> crate::Result<(TcpListener, Endpoint)> {
        let endpoint = Endpoint::parse(&self.shared.url)?;
        let listener = TcpListener::bind((endpoint.host.as_str(), endpoint.port)).await?;
        Ok((listener, endpoint))
    }

    /// Whether the accept loop is running
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Snapshot of the connected clients
    pub fn clients(&self) -> Vec<ServerClient> {
        self.shared.registry.snapshot()
    }

    pub fn client(&self, id: ConnectionId) -> Option<ServerClient> {
        self.shared.registry.get(id)
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.shared.registry
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Broadcast in the background
    ///
    /// Runs on the listener's runtime; callable from any thread. Dropped with
    /// a warning when the listener never started and no runtime is current.
    pub fn send_all(&self, message: impl Into<String>) {
        let runtime = match self.runtime.get() {
            Some(runtime) => runtime.clone(),
            None => match Handle::try_current() {
                Ok(runtime) => runtime,
                Err(_) => {
                    log_server!(Level::WARN, "send_all called outside a tokio runtime");
                    return;
                }
            },
        };

        let shared = self.shared.clone();
        let message = message.into();
        runtime.spawn(async move {
            shared.broadcast(&message).await;
        });
    }

    /// Send `message` to every open client and wait for the writes
    pub async fn send_all_async(&self, message: &str) -> BroadcastReport {
        self.shared.broadcast(message).await
    }

    /// Stop accepting and close every client
    ///
    /// Waits (bounded) until client loops have fired their disconnects.
    /// Safe to call any number of times, also on a listener never started.
    pub async fn stop(&self) {
        self.shared.cancel.cancel();
        self.shared.clients.close();

        let task = self.task.lock().take();
        if let Some(mut task) = task {
            match timeout(STOP_TIMEOUT, &mut task).await {
                Ok(Err(e)) => log_server!(Level::ERROR, "accept task panicked: {}", e),
                Err(_) => {
                    log_server!(Level::WARN, "accept loop did not stop in time");
                    task.abort();
                }
                Ok(Ok(())) => {}
            }
        }

        if timeout(STOP_TIMEOUT, self.shared.clients.wait()).await.is_err() {
            log_server!(Level::WARN, remaining = self.client_count(), "client loops did not stop in time");
        }

        if self.shared.alive.swap(false, Ordering::AcqRel) {
            log_server!(Level::INFO, url = %self.shared.url, "listener stopped");
        }
    }
}

/// Upgrade handler for the listener path
async fn accept(
    State(shared): State<Arc<ListenerShared>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            log_server!(Level::DEBUG, %remote, "non-upgrade request: {}", rejection);
            return if shared.config.server.refuse_non_upgrade_requests {
                StatusCode::BAD_REQUEST.into_response()
            } else {
                StatusCode::NO_CONTENT.into_response()
            };
        }
    };

    let limit = shared.capacity.bytes();
    upgrade
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(move |e| {
            log_server!(Level::WARN, %remote, "upgrade failed: {}", e);
        })
        .on_upgrade(move |socket| {
            let clients = shared.clients.clone();
            clients.track_future(serve_client(shared, socket, remote))
        })
}

/// Receive loop of one accepted client
async fn serve_client(shared: Arc<ListenerShared>, socket: WebSocket, remote: SocketAddr) {
    let (connection, reader) = Connection::open(socket, shared.cancel.child_token());
    let client = ServerClient::new(connection.clone(), Some(remote));

    shared.registry.insert(client.clone());
    shared.metrics.record_accept();
    log_server!(Level::INFO, id = %client.id(), %remote, "client connected");
    shared.handler.on_client_connect(&client);

    let mut buffer = ReceiveBuffer::new(shared.capacity);
    let exit = receive_loop(&connection, reader, &mut buffer, |text| {
        shared.metrics.record_message();
        if text == PING_PAYLOAD {
            client.send(PONG_PAYLOAD);
            shared.metrics.record_ping();
        } else {
            shared.handler.on_client_message(&client, text);
        }
    })
    .await;

    if let LoopExit::Failed(e) = &exit {
        log_server!(Level::WARN, id = %client.id(), "client read failed: {}", e);
        shared.handler.on_client_error(&client, e);
    }

    connection.close("Bye").await;
    if shared.registry.remove(client.id()).is_some() {
        shared.metrics.record_close();
        log_server!(Level::INFO, id = %client.id(), ?exit, "client disconnected");
        shared.handler.on_client_disconnect(&client);
    }
}
