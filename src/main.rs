//! wslink demo
//!
//! - `wslink serve [url]`: relay listener, every client message is broadcast
//!   to all connected clients
//! - `wslink connect [url]`: console client; stdin lines are sent, `/ping`
//!   measures latency, `/quit` closes
//!
//! Settings come from config.toml (or `CONFIG_PATH`); the url argument
//! overrides the configured one.

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::Level;

use wslink::infrastructure::init_logging;
use wslink::{log_main, ClientSession, Config, Listener, ListenerHandler, ServerClient, SessionHandler, WebSocketError};

enum Command {
    Serve(Option<String>),
    Connect(Option<String>),
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let command = args.next();
        let url = args.next();
        match command.as_deref() {
            Some("serve") => Ok(Command::Serve(url)),
            Some("connect") => Ok(Command::Connect(url)),
            Some(other) => bail!("unknown command '{other}', expected serve or connect"),
            None => bail!("usage: wslink <serve|connect> [url]"),
        }
    }
}

/// Forwards client messages to the relay task
struct Relay {
    outbox: mpsc::UnboundedSender<String>,
}

impl ListenerHandler for Relay {
    fn on_client_connect(&self, client: &ServerClient) {
        log_main!(Level::INFO, "{} joined from {:?}", client.id(), client.remote_addr());
    }

    fn on_client_disconnect(&self, client: &ServerClient) {
        log_main!(Level::INFO, "{} left", client.id());
    }

    fn on_client_message(&self, client: &ServerClient, text: &str) {
        let _ = self.outbox.send(format!("{}: {}", client.id(), text));
    }

    fn on_client_error(&self, client: &ServerClient, error: &WebSocketError) {
        log_main!(Level::WARN, "{} failed: {}", client.id(), error);
    }
}

/// Prints session events to the console
struct Console;

impl SessionHandler for Console {
    fn on_connect(&self) {
        println!("* connected");
    }

    fn on_disconnect(&self) {
        println!("* disconnected");
    }

    fn on_message(&self, text: &str) {
        println!("{text}");
    }

    fn on_error(&self, error: &str) {
        eprintln!("* error: {error}");
    }
}

async fn serve(config: Config, url: Option<String>) -> anyhow::Result<()> {
    let url = url.unwrap_or_else(|| config.server.url.clone());
    let (outbox, mut relay) = mpsc::unbounded_channel();
    let listener = Listener::new(url.as_str(), config, Relay { outbox });

    let addr = listener
        .start()
        .await
        .with_context(|| format!("failed to start listener on {url}"))?;
    log_main!(Level::INFO, %addr, "relay listening");

    loop {
        tokio::select! {
            message = relay.recv() => match message {
                Some(message) => {
                    listener.send_all_async(&message).await;
                }
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                result.context("failed to wait for ctrl-c")?;
                break;
            }
        }
    }

    listener.stop().await;
    log_main!(Level::INFO, metrics = ?listener.metrics(), "relay stopped");
    Ok(())
}

async fn connect(config: Config, url: Option<String>) -> anyhow::Result<()> {
    let url = url.unwrap_or_else(|| config.client.url.clone());
    let session = ClientSession::new(url.as_str(), config, Console);
    session
        .connect_async()
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !session.is_alive() {
            break;
        }
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/ping" => match session.ping().await {
                Some(rtt) => println!("* pong in {rtt}ms"),
                None => println!("* no pong"),
            },
            _ => session.send_async(line).await?,
        }
    }

    session.close_async().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = Command::parse(std::env::args().skip(1))?;

    let _guards = init_logging("logs").context("failed to initialize logging")?;

    let config = Config::load().context("failed to load config")?;

    match command {
        Command::Serve(url) => serve(config, url).await,
        Command::Connect(url) => connect(config, url).await,
    }
}
