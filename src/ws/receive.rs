//! Per-connection receive loop
//!
//! One loop runs per connection for its whole open lifetime. It reads one
//! message at a time, decodes it through the connection's receive buffer and
//! hands the text to the side-specific callback, strictly in arrival order.

use std::fmt;

use futures_util::{Stream, StreamExt};

use crate::core::ReceiveBuffer;
use crate::ws::connection::{Connection, WebSocketError};
use crate::ws::transport::{Inbound, WireMessage};

/// Why a receive loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Peer sent a close frame
    PeerClosed,
    /// Stream ended without a close frame
    StreamEnded,
    /// Connection or owner scope was cancelled, or the connection left Open
    Cancelled,
    /// Read or decode failure
    Failed(WebSocketError),
}

/// Drive `reader` until the connection stops being readable
///
/// Does not close the connection; the caller does its bookkeeping first.
pub(crate) async fn receive_loop<R, M, E, F>(
    connection: &Connection,
    mut reader: R,
    buffer: &mut ReceiveBuffer,
    mut on_text: F,
) -> LoopExit
where
    R: Stream<Item = Result<M, E>> + Unpin,
    M: WireMessage,
    E: fmt::Display,
    F: FnMut(&str),
{
    let token = connection.token().clone();

    while connection.is_open() {
        let next = tokio::select! {
            _ = token.cancelled() => return LoopExit::Cancelled,
            next = reader.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => return LoopExit::Failed(WebSocketError::ReceiveFailed(e.to_string())),
            None => return LoopExit::StreamEnded,
        };

        match message.inbound() {
            Inbound::Data(payload) => match buffer.decode(payload) {
                Ok(text) => on_text(&*text),
                Err(e) => return LoopExit::Failed(e),
            },
            Inbound::Close => return LoopExit::PeerClosed,
            Inbound::Control => {}
        }
    }

    LoopExit::Cancelled
}
