//! In-process loopback channel.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{
    ChannelListener, DuplexChannel, InboundMessage, OutboundMessage, ReadyState, SendOptions,
};
use crate::error::{FlowError, FlowResult};

struct MemoryInner {
    state: ReadyState,
    listeners: Vec<Rc<dyn ChannelListener>>,
    /// Everything sent through this end, in order.
    sent: Vec<(OutboundMessage, SendOptions)>,
    /// Other end of a pair; sends are delivered there.
    peer: Option<Weak<RefCell<MemoryInner>>>,
}

/// Loopback [`DuplexChannel`].
///
/// A standalone channel records what is sent and lets the caller inject
/// inbound messages with [`deliver`](MemoryChannel::deliver). A channel
/// created with [`pair`](MemoryChannel::pair) additionally delivers every
/// sent message to the other end.
///
/// Events are dispatched synchronously to the listeners.
#[derive(Clone)]
pub struct MemoryChannel {
    inner: Rc<RefCell<MemoryInner>>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    /// Create a channel in the connecting state.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemoryInner {
                state: ReadyState::Connecting,
                listeners: Vec::new(),
                sent: Vec::new(),
                peer: None,
            })),
        }
    }

    /// Create a channel that is already open.
    pub fn opened() -> Self {
        let channel = Self::new();
        channel.inner.borrow_mut().state = ReadyState::Open;
        channel
    }

    /// Create two connected ends. Opening or closing one end affects both.
    pub fn pair() -> (Self, Self) {
        let left = Self::new();
        let right = Self::new();
        left.inner.borrow_mut().peer = Some(Rc::downgrade(&right.inner));
        right.inner.borrow_mut().peer = Some(Rc::downgrade(&left.inner));
        (left, right)
    }

    /// Transition to open and notify listeners.
    pub fn open(&self) {
        let peer = self.peer();
        Self::transition(&self.inner, ReadyState::Open);
        if let Some(peer) = peer {
            Self::transition(&peer, ReadyState::Open);
        }
    }

    /// Transition to closed and notify listeners.
    pub fn close(&self) {
        let peer = self.peer();
        Self::transition(&self.inner, ReadyState::Closed);
        if let Some(peer) = peer {
            Self::transition(&peer, ReadyState::Closed);
        }
    }

    /// Inject an inbound message.
    ///
    /// Messages delivered on a closed channel are dropped.
    pub fn deliver(&self, message: InboundMessage) {
        Self::deliver_to(&self.inner, message);
    }

    /// Inject an inbound text message.
    pub fn deliver_text(&self, text: impl Into<String>) {
        self.deliver(InboundMessage::text(text));
    }

    /// Messages sent through this end so far.
    pub fn sent(&self) -> Vec<(OutboundMessage, SendOptions)> {
        self.inner.borrow().sent.clone()
    }

    fn peer(&self) -> Option<Rc<RefCell<MemoryInner>>> {
        self.inner.borrow().peer.as_ref().and_then(Weak::upgrade)
    }

    fn transition(inner: &Rc<RefCell<MemoryInner>>, target: ReadyState) {
        let listeners = {
            let mut inner = inner.borrow_mut();
            let allowed = match target {
                ReadyState::Open => inner.state == ReadyState::Connecting,
                _ => inner.state != ReadyState::Closed,
            };
            if !allowed {
                return;
            }
            inner.state = target;
            inner.listeners.clone()
        };

        tracing::debug!(state = ?target, listeners = listeners.len(), "memory channel transition");
        for listener in listeners {
            match target {
                ReadyState::Open => listener.on_open(),
                ReadyState::Closing | ReadyState::Closed => listener.on_close(),
                ReadyState::Connecting => {}
            }
        }
    }

    fn deliver_to(inner: &Rc<RefCell<MemoryInner>>, message: InboundMessage) {
        let listeners = {
            let inner = inner.borrow();
            if inner.state.is_closed() {
                tracing::trace!("dropping message delivered to closed memory channel");
                return;
            }
            inner.listeners.clone()
        };
        for listener in listeners {
            listener.on_message(message.clone());
        }
    }
}

impl DuplexChannel for MemoryChannel {
    fn ready_state(&self) -> ReadyState {
        self.inner.borrow().state
    }

    fn add_listener(&self, listener: Rc<dyn ChannelListener>) {
        self.inner.borrow_mut().listeners.push(listener);
    }

    fn send(&self, message: OutboundMessage, options: &SendOptions) -> FlowResult<()> {
        let peer = {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                ReadyState::Open => {}
                ReadyState::Connecting => {
                    return Err(FlowError::Send("channel is not open yet".to_string()))
                }
                ReadyState::Closing | ReadyState::Closed => return Err(FlowError::ChannelClosed),
            }
            inner.sent.push((message.clone(), *options));
            inner.peer.as_ref().and_then(Weak::upgrade)
        };

        if let Some(peer) = peer {
            Self::deliver_to(&peer, message.into_inbound());
        }
        Ok(())
    }
}
