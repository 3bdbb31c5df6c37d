//! Error types for socketflow.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the synchronization primitives, the dispatcher and
/// pipeline stages.
///
/// The enum is `Clone` because a single stage failure is delivered to every
/// subscriber of that stage, including late subscribers replaying history.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// A synchronization primitive was used in a way its contract forbids,
    /// e.g. a second signal on a strict-pair rendezvous.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The channel did not reach the open state within the configured bound.
    #[error("Channel did not open within {0:?}")]
    ConnectionTimeout(Duration),

    /// A stage expected another record but the channel closed first.
    #[error("Stream exhausted: a record was expected but the channel closed")]
    StreamExhausted,

    /// A stage outlived the dispatcher it pulls records from.
    #[error("Dispatcher vanished")]
    DispatcherVanished,

    /// A stage handler returned an error.
    #[error("Handler failed: {0}")]
    Handler(String),

    /// An inbound payload could not be decoded into the handler's message type.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// The channel is closed and cannot transmit.
    #[error("Channel closed")]
    ChannelClosed,

    /// The channel rejected an outbound message.
    #[error("Send failed: {0}")]
    Send(String),
}

impl From<serde_json::Error> for FlowError {
    fn from(error: serde_json::Error) -> Self {
        FlowError::Decode(error.to_string())
    }
}

/// Result type for socketflow operations.
pub type FlowResult<T> = Result<T, FlowError>;
