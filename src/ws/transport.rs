//! Transport message adapters
//!
//! The client side talks to `tokio-tungstenite`, the listener side to
//! `axum`'s WebSocket extractor. Both message types are viewed through
//! [`WireMessage`] so the connection handle, writer task and receive loop
//! are shared by the two sides.

use std::borrow::Cow;

use axum::extract::ws::{close_code, CloseFrame as AxumCloseFrame, Message as AxumMessage};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

/// Borrowed view of an inbound message
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Text or binary payload, decoded as text by the receive loop
    Data(&'a [u8]),
    /// Close frame from the peer
    Close,
    /// Transport-level ping/pong, answered by the transport itself
    Control,
}

/// A transport message type the connection layer can read and write
pub trait WireMessage: Send + 'static {
    /// Classify an inbound message without copying its payload
    fn inbound(&self) -> Inbound<'_>;

    /// Build an outbound text message
    fn text(text: String) -> Self;

    /// Build a normal-closure close frame
    fn close(reason: String) -> Self;
}

impl WireMessage for Message {
    #[inline]
    fn inbound(&self) -> Inbound<'_> {
        match self {
            Message::Text(text) => Inbound::Data(text.as_str().as_bytes()),
            Message::Binary(data) => Inbound::Data(data),
            Message::Close(_) => Inbound::Close,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Control,
        }
    }

    #[inline]
    fn text(text: String) -> Self {
        Message::text(text)
    }

    fn close(reason: String) -> Self {
        Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: reason.into(),
        }))
    }
}

impl WireMessage for AxumMessage {
    #[inline]
    fn inbound(&self) -> Inbound<'_> {
        match self {
            AxumMessage::Text(text) => Inbound::Data(text.as_bytes()),
            AxumMessage::Binary(data) => Inbound::Data(data),
            AxumMessage::Close(_) => Inbound::Close,
            AxumMessage::Ping(_) | AxumMessage::Pong(_) => Inbound::Control,
        }
    }

    #[inline]
    fn text(text: String) -> Self {
        AxumMessage::Text(text)
    }

    fn close(reason: String) -> Self {
        AxumMessage::Close(Some(AxumCloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Owned(reason),
        }))
    }
}
