//! Listener address parsing
//!
//! Accepts `ws://host:port/path` (or `http://`). A host of `+` or `*` binds
//! every interface. `wss://` is refused: TLS termination belongs in front of
//! the listener.

use url::{Host, Url};

use crate::{Result, WsLinkError};

/// Where a listener binds and which path it serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self> {
        let normalized = url.replacen("://+", "://0.0.0.0", 1).replacen("://*", "://0.0.0.0", 1);
        let parsed = Url::parse(&normalized)?;

        match parsed.scheme() {
            "ws" | "http" => {}
            "wss" | "https" => {
                return Err(WsLinkError::Config(format!(
                    "{url}: TLS is not terminated by the listener, use ws://"
                )))
            }
            other => {
                return Err(WsLinkError::Config(format!(
                    "{url}: unsupported scheme '{other}'"
                )))
            }
        }

        let host = match parsed.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(WsLinkError::Config(format!("{url}: missing host"))),
        };

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| WsLinkError::Config(format!("{url}: missing port")))?;

        Ok(Self {
            host,
            port,
            path: parsed.path().to_string(),
        })
    }

    /// Route pattern matching every path below the prefix
    ///
    /// `/` gives `/*rest`, `/chat` and `/chat/` both give `/chat/*rest`.
    pub fn subpaths(&self) -> String {
        format!("{}/*rest", self.path.trim_end_matches('/'))
    }
}
