//! Inbound payload decoding.
//!
//! Stage handlers receive typed messages. [`decode`] turns an
//! [`InboundMessage`] into the handler's message type according to the
//! configured [`MessageFormat`]:
//!
//! - [`MessageFormat::Json`]: the payload is read as UTF-8 text and parsed as
//!   JSON. When that fails the raw text itself is offered to the message
//!   type, so a plain `hello` frame still decodes into a `String`. Payloads
//!   that are not valid UTF-8 are rejected.
//! - [`MessageFormat::Buffer`]: no parsing. The message type is built from the
//!   raw bytes (binary frames) or the UTF-8 bytes (text frames); use
//!   [`bytes::Bytes`] as the handler's message type.

use serde::de::DeserializeOwned;
use serde::de::value::BytesDeserializer;

use crate::channel::InboundMessage;
use crate::error::{FlowError, FlowResult};

/// How inbound payloads are presented to handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageFormat {
    /// Parse as JSON, falling back to the raw text.
    #[default]
    Json,
    /// Hand over the raw bytes.
    Buffer,
}

/// Decode an inbound message into `M`.
///
/// # Errors
///
/// Returns [`FlowError::Decode`] when neither the parsed payload nor the raw
/// payload fits `M`, or when a JSON payload is not UTF-8.
pub fn decode<M: DeserializeOwned>(
    message: InboundMessage,
    format: MessageFormat,
) -> FlowResult<M> {
    match format {
        MessageFormat::Json => decode_json(message),
        MessageFormat::Buffer => decode_buffer(message),
    }
}

fn decode_json<M: DeserializeOwned>(message: InboundMessage) -> FlowResult<M> {
    let (payload, _) = message.into_parts();
    let text = std::str::from_utf8(&payload)
        .map_err(|e| FlowError::Decode(format!("payload is not UTF-8 text: {}", e)))?;

    match serde_json::from_str::<M>(text) {
        Ok(value) => Ok(value),
        Err(parse_error) => {
            tracing::trace!(error = %parse_error, "payload is not JSON, offering raw text");
            let raw = serde_json::Value::String(text.to_owned());
            serde_json::from_value::<M>(raw).map_err(|_| {
                FlowError::Decode(format!(
                    "payload is neither JSON nor text for this type: {}",
                    parse_error
                ))
            })
        }
    }
}

fn decode_buffer<M: DeserializeOwned>(message: InboundMessage) -> FlowResult<M> {
    // Text frames already carry their UTF-8 bytes.
    let (payload, _) = message.into_parts();
    let deserializer = BytesDeserializer::<serde::de::value::Error>::new(&payload);
    M::deserialize(deserializer).map_err(|e| FlowError::Decode(e.to_string()))
}
