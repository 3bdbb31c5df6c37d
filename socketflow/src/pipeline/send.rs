//! Sender stages: transmit emissions on the channel.

use std::rc::Rc;

use serde::Serialize;

use super::FlowContext;
use super::stage::{Observer, Stage};
use crate::channel::{OutboundMessage, SendOptions};
use crate::error::FlowResult;

/// Outcome of a send transform for one emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Transmit this message.
    Send(OutboundMessage),
    /// Transmit nothing for this emission.
    Skip,
}

impl Outgoing {
    /// Transmit `message`.
    pub fn send(message: impl Into<OutboundMessage>) -> Self {
        Outgoing::Send(message.into())
    }

    /// Transmit `value` encoded as JSON text.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> FlowResult<Self> {
        Ok(Outgoing::Send(OutboundMessage::json(value)?))
    }

    /// Whether nothing is transmitted.
    pub fn is_skip(&self) -> bool {
        matches!(self, Outgoing::Skip)
    }
}

impl From<OutboundMessage> for Outgoing {
    fn from(message: OutboundMessage) -> Self {
        Outgoing::Send(message)
    }
}

impl From<Option<OutboundMessage>> for Outgoing {
    fn from(message: Option<OutboundMessage>) -> Self {
        message.map_or(Outgoing::Skip, Outgoing::Send)
    }
}

type Transform<T> = Box<dyn Fn(&T) -> Outgoing>;

struct Transmitter<T> {
    flow: Rc<FlowContext>,
    transform: Transform<T>,
    options: SendOptions,
    stage: usize,
}

impl<T> Observer<T> for Transmitter<T> {
    fn on_emit(&self, value: &T) {
        let message = match (self.transform)(value) {
            Outgoing::Send(message) => message,
            Outgoing::Skip => {
                tracing::trace!(stage = self.stage, "send skipped");
                return;
            }
        };

        let binary = message.is_binary();
        match self.flow.channel.send(message, &self.options) {
            Ok(()) => tracing::trace!(stage = self.stage, binary, "message sent"),
            Err(e) => tracing::warn!(stage = self.stage, error = %e, "failed to send message"),
        }
    }
}

impl<T: Clone + 'static> Stage<T> {
    /// Transmit `payload` once per emission of this stage.
    ///
    /// Returns this stage, so further stages keep chaining from it.
    pub fn send(&self, payload: impl Into<OutboundMessage>) -> Stage<T> {
        let payload = payload.into();
        self.send_with(move |_| Outgoing::Send(payload.clone()))
    }

    /// Transmit what `transform` makes of each emission.
    ///
    /// Returning [`Outgoing::Skip`] suppresses transmission for that
    /// emission. Send failures are logged and do not fail the stage.
    pub fn send_with<F>(&self, transform: F) -> Stage<T>
    where
        F: Fn(&T) -> Outgoing + 'static,
    {
        self.send_with_options(transform, SendOptions::default())
    }

    /// Like [`send_with`](Stage::send_with), passing `options` to the
    /// channel on every transmission.
    pub fn send_with_options<F>(&self, transform: F, options: SendOptions) -> Stage<T>
    where
        F: Fn(&T) -> Outgoing + 'static,
    {
        let _ = self.attach(Rc::new(Transmitter {
            flow: self.flow().clone(),
            transform: Box::new(transform),
            options,
            stage: self.depth(),
        }));
        self.clone()
    }
}
