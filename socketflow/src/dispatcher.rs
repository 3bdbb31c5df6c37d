//! MessageDispatcher: turns pushed channel events into a pull sequence.
//!
//! The dispatcher registers itself as a [`ChannelListener`]. Every arrival is
//! queued and announced with a `signal()` on an internal
//! [`RendezvousChannel`]; every [`next`](MessageDispatcher::next) performs the
//! matching `wait()` and pops the oldest record. Signals are never awaited, so
//! the channel callback returns immediately.
//!
//! The sequence is *available* while the channel is open or records are
//! still queued. Once the channel closed and the queue drained it is
//! permanently unavailable and `next()` returns `Ok(None)`.
//!
//! # Ownership
//!
//! The channel owns the listener and the listener owns the dispatcher state,
//! so the dispatcher lives exactly as long as the channel. Stages keep a
//! [`WeakDispatcher`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use tokio::sync::watch;

use crate::channel::{ChannelListener, DuplexChannel, InboundMessage, ReadyState};
use crate::config::FlowConfig;
use crate::error::{FlowError, FlowResult};
use crate::sync::{Rendezvous, RendezvousChannel};

/// State shared between the channel listener and dispatcher handles.
struct DispatcherShared {
    /// Arrived records, oldest first.
    queue: RefCell<VecDeque<InboundMessage>>,

    /// One signal per queued record.
    arrivals: RendezvousChannel,

    /// Channel state as observed through listener events.
    ready_state: watch::Sender<ReadyState>,

    /// Whether the pull sequence can still produce records.
    available: watch::Sender<bool>,

    /// Set by `finish()`; ends the pull sequence early.
    finished: Cell<bool>,

    /// Statistics for debugging.
    messages_received: Cell<u64>,
    messages_dropped: Cell<u64>,
}

impl DispatcherShared {
    fn compute_available(&self) -> bool {
        !self.finished.get()
            && (self.ready_state.borrow().is_open() || !self.queue.borrow().is_empty())
    }

    fn refresh_available(&self) {
        let available = self.compute_available();
        let changed = self.available.send_if_modified(|current| {
            if *current == available {
                return false;
            }
            *current = available;
            true
        });
        if changed && !available {
            tracing::info!(
                received = self.messages_received.get(),
                "message stream ended"
            );
        }
    }
}

impl ChannelListener for DispatcherShared {
    fn on_open(&self) {
        self.ready_state.send_replace(ReadyState::Open);
        self.refresh_available();
        tracing::debug!("channel opened");
    }

    fn on_message(&self, message: InboundMessage) {
        if self.finished.get() || self.ready_state.borrow().is_closed() {
            tracing::warn!(
                binary = message.is_binary(),
                "dropping message that arrived after the stream ended"
            );
            self.messages_dropped.set(self.messages_dropped.get() + 1);
            return;
        }

        self.queue.borrow_mut().push_back(message);
        self.messages_received.set(self.messages_received.get() + 1);

        if let Err(e) = self.arrivals.signal() {
            tracing::error!(error = %e, "failed to announce arrival");
        }
        self.refresh_available();
    }

    fn on_close(&self) {
        self.ready_state.send_replace(ReadyState::Closed);
        self.refresh_available();
        tracing::debug!(backlog = self.queue.borrow().len(), "channel closed");
    }
}

/// Single-consumer pull sequence over a duplex channel's inbound messages.
///
/// Cloning yields another handle to the same dispatcher.
#[derive(Clone)]
pub struct MessageDispatcher {
    shared: Rc<DispatcherShared>,
    config: FlowConfig,
}

impl MessageDispatcher {
    /// Attach a dispatcher to `channel` with the default configuration.
    pub fn new(channel: &dyn DuplexChannel) -> Self {
        Self::with_config(channel, FlowConfig::default())
    }

    /// Attach a dispatcher to `channel`.
    pub fn with_config(channel: &dyn DuplexChannel, config: FlowConfig) -> Self {
        let ready_state = channel.ready_state();
        let shared = Rc::new(DispatcherShared {
            queue: RefCell::new(VecDeque::new()),
            arrivals: RendezvousChannel::new(),
            ready_state: watch::Sender::new(ready_state),
            available: watch::Sender::new(ready_state.is_open()),
            finished: Cell::new(false),
            messages_received: Cell::new(0),
            messages_dropped: Cell::new(0),
        });
        channel.add_listener(shared.clone());
        tracing::debug!(state = ?ready_state, "dispatcher attached");
        Self { shared, config }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Channel state as last observed.
    pub fn ready_state(&self) -> ReadyState {
        *self.shared.ready_state.borrow()
    }

    /// Whether the pull sequence can still produce records.
    pub fn available(&self) -> bool {
        self.shared.compute_available()
    }

    /// Resolve once the pull sequence is unavailable.
    ///
    /// Resolves immediately while the channel is still connecting.
    pub async fn unavailable(&self) {
        let mut available = self.shared.available.subscribe();
        let _ = available.wait_for(|available| !*available).await;
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.shared.queue.borrow().len()
    }

    /// Whether no record is queued.
    pub fn is_empty(&self) -> bool {
        self.shared.queue.borrow().is_empty()
    }

    /// Total number of records received.
    pub fn messages_received(&self) -> u64 {
        self.shared.messages_received.get()
    }

    /// Number of records dropped because they arrived after the end.
    pub fn messages_dropped(&self) -> u64 {
        self.shared.messages_dropped.get()
    }

    /// Wait until the channel leaves the connecting state.
    ///
    /// Returns immediately if the channel is open or already closed.
    ///
    /// # Errors
    ///
    /// [`FlowError::ConnectionTimeout`] if the channel is still connecting
    /// after the configured open timeout.
    pub async fn wait_open(&self) -> FlowResult<()> {
        let mut ready_state = self.shared.ready_state.subscribe();
        if *ready_state.borrow() != ReadyState::Connecting {
            return Ok(());
        }

        let opened = ready_state.wait_for(|state| *state != ReadyState::Connecting);
        let result = match tokio::time::timeout(self.config.open_timeout, opened).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(FlowError::DispatcherVanished),
            Err(_) => {
                tracing::warn!(timeout = ?self.config.open_timeout, "channel did not open in time");
                Err(FlowError::ConnectionTimeout(self.config.open_timeout))
            }
        };
        result
    }

    /// Pull the next record.
    ///
    /// Waits for the channel to open first. Returns `Ok(None)` once the
    /// sequence is unavailable; a pending call is woken as soon as the
    /// channel closes with nothing queued.
    ///
    /// Single consumer: concurrent calls are served in call order, and no
    /// record is returned twice. Dropping a pending call gives its claim
    /// back, so the next record goes to the next caller.
    pub async fn next(&self) -> FlowResult<Option<InboundMessage>> {
        if self.ready_state() == ReadyState::Connecting {
            self.wait_open().await?;
        }

        if !self.available() {
            return Ok(None);
        }

        let mut arrival = PendingArrival {
            arrivals: &self.shared.arrivals,
            arrival: self.shared.arrivals.wait()?,
            consumed: false,
        };
        tokio::select! {
            biased;
            _ = &mut arrival.arrival => {}
            _ = self.unavailable() => {
                tracing::trace!("pull ended by channel close");
                return Ok(None);
            }
        }

        let message = self.shared.queue.borrow_mut().pop_front();
        arrival.consumed = true;
        self.shared.refresh_available();
        Ok(message)
    }

    /// End the pull sequence early. Queued records are discarded.
    pub fn finish(&self) {
        let discarded = {
            let mut queue = self.shared.queue.borrow_mut();
            let discarded = queue.len();
            queue.clear();
            discarded
        };
        self.shared.finished.set(true);
        self.shared.refresh_available();
        tracing::debug!(discarded, "dispatcher finished");
    }

    /// Weak handle that does not keep the dispatcher alive.
    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            shared: Rc::downgrade(&self.shared),
            config: self.config.clone(),
        }
    }
}

/// A pull's claim on one arrival.
///
/// Dropped before popping, an unmatched wait is withdrawn and a matched one
/// puts its arrival signal back, so every queued record keeps one signal.
struct PendingArrival<'a> {
    arrivals: &'a RendezvousChannel,
    arrival: Rendezvous,
    consumed: bool,
}

impl Drop for PendingArrival<'_> {
    fn drop(&mut self) {
        if self.consumed || self.arrivals.withdraw(&mut self.arrival) {
            return;
        }
        tracing::trace!("cancelled pull returns its arrival");
        if let Err(e) = self.arrivals.signal() {
            tracing::error!(error = %e, "failed to return arrival");
        }
    }
}

/// Non-owning dispatcher handle held by pipeline stages.
#[derive(Clone)]
pub struct WeakDispatcher {
    shared: Weak<DispatcherShared>,
    config: FlowConfig,
}

impl WeakDispatcher {
    /// Recover a strong handle.
    ///
    /// # Errors
    ///
    /// [`FlowError::DispatcherVanished`] if the channel and every dispatcher
    /// handle were dropped.
    pub fn upgrade(&self) -> FlowResult<MessageDispatcher> {
        let shared = self.shared.upgrade().ok_or(FlowError::DispatcherVanished)?;
        Ok(MessageDispatcher {
            shared,
            config: self.config.clone(),
        })
    }
}
