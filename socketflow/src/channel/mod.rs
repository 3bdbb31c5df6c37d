//! Duplex channel abstraction.
//!
//! The transport itself (connection setup, framing, TLS) lives outside this
//! crate. A transport plugs in by implementing [`DuplexChannel`] and pushing
//! its events to the registered [`ChannelListener`]s.
//!
//! [`MemoryChannel`] is an in-process loopback implementation used by the
//! tests and handy for wiring pipelines together without a network.

mod memory;

pub use memory::MemoryChannel;

use std::rc::Rc;

use bytes::Bytes;
use serde::Serialize;

use crate::error::FlowResult;

/// Lifecycle of a duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Not yet open.
    Connecting,
    /// Open for both directions.
    Open,
    /// Close handshake in progress.
    Closing,
    /// Closed; no more messages will arrive.
    Closed,
}

impl ReadyState {
    /// Whether the channel is open.
    pub fn is_open(self) -> bool {
        self == ReadyState::Open
    }

    /// Whether the channel reached a terminal state.
    pub fn is_closed(self) -> bool {
        matches!(self, ReadyState::Closing | ReadyState::Closed)
    }
}

/// A message as it arrived on the channel.
///
/// Created on arrival and consumed exactly once by the dispatcher's pull
/// sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    payload: Bytes,
    is_binary: bool,
}

impl InboundMessage {
    /// Create a message from its raw parts.
    pub fn new(payload: impl Into<Bytes>, is_binary: bool) -> Self {
        Self {
            payload: payload.into(),
            is_binary,
        }
    }

    /// Create a text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text.into(), false)
    }

    /// Create a binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(payload, true)
    }

    /// Raw payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether the message arrived as a binary frame.
    pub fn is_binary(&self) -> bool {
        self.is_binary
    }

    /// Split into payload and binary flag.
    pub fn into_parts(self) -> (Bytes, bool) {
        (self.payload, self.is_binary)
    }
}

/// A message to transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl OutboundMessage {
    /// Encode a value as a JSON text message.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> FlowResult<Self> {
        Ok(OutboundMessage::Text(serde_json::to_string(value)?))
    }

    /// Whether this is a binary frame.
    pub fn is_binary(&self) -> bool {
        matches!(self, OutboundMessage::Binary(_))
    }

    /// Convert into the form a peer receives.
    pub fn into_inbound(self) -> InboundMessage {
        match self {
            OutboundMessage::Text(text) => InboundMessage::text(text),
            OutboundMessage::Binary(payload) => InboundMessage::binary(payload),
        }
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        OutboundMessage::Text(text)
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        OutboundMessage::Text(text.to_string())
    }
}

impl From<Bytes> for OutboundMessage {
    fn from(payload: Bytes) -> Self {
        OutboundMessage::Binary(payload)
    }
}

impl From<Vec<u8>> for OutboundMessage {
    fn from(payload: Vec<u8>) -> Self {
        OutboundMessage::Binary(Bytes::from(payload))
    }
}

/// Transmission flags passed through to the channel untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Mask the frame.
    pub mask: Option<bool>,
    /// Force a binary frame.
    pub binary: Option<bool>,
    /// Compress the frame.
    pub compress: Option<bool>,
    /// Mark the frame as final.
    pub fin: Option<bool>,
}

/// Receives channel events.
///
/// Implementations must not call back into the channel from these methods.
pub trait ChannelListener {
    /// The channel reached the open state.
    fn on_open(&self);

    /// A message arrived.
    fn on_message(&self, message: InboundMessage);

    /// The channel closed; no further messages will arrive.
    fn on_close(&self);
}

/// A bidirectional message channel.
pub trait DuplexChannel {
    /// Current lifecycle state.
    fn ready_state(&self) -> ReadyState;

    /// Register a listener for open, message and close events.
    ///
    /// The channel keeps the listener alive for as long as it lives.
    fn add_listener(&self, listener: Rc<dyn ChannelListener>);

    /// Transmit a message.
    fn send(&self, message: OutboundMessage, options: &SendOptions) -> FlowResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_constructors() {
        let text = InboundMessage::text("hello");
        assert!(!text.is_binary());
        assert_eq!(text.payload().as_ref(), b"hello");

        let binary = InboundMessage::binary(vec![1u8, 2, 3]);
        assert!(binary.is_binary());
        let (payload, is_binary) = binary.into_parts();
        assert_eq!(payload.as_ref(), &[1, 2, 3]);
        assert!(is_binary);
    }

    #[test]
    fn test_outbound_json() {
        let message = OutboundMessage::json(&4).expect("encode");
        assert_eq!(message, OutboundMessage::Text("4".to_string()));
        assert!(!message.is_binary());
        assert_eq!(message.into_inbound(), InboundMessage::text("4"));
    }

    #[test]
    fn test_ready_state_predicates() {
        assert!(ReadyState::Open.is_open());
        assert!(!ReadyState::Connecting.is_open());
        assert!(ReadyState::Closing.is_closed());
        assert!(ReadyState::Closed.is_closed());
        assert!(!ReadyState::Connecting.is_closed());
    }
}
