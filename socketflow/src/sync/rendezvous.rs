//! RendezvousChannel: payload-less FIFO matching of wait and signal requests.
//!
//! Every `wait()` is paired with exactly one `signal()`. Requests that cannot
//! be matched immediately are queued; the queue therefore only ever holds
//! requests of a single kind. Whenever a match empties the queue, every
//! observer registered through `wait_all()` fires once.
//!
//! Registration happens when `wait()` / `signal()` is called, not when the
//! returned future is first polled. A caller that drops the future still
//! takes part in matching; this is what lets a producer announce work
//! without waiting for it to be consumed.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{FlowError, FlowResult};

/// Side of a rendezvous request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Waits for a signal.
    Wait,
    /// Signals a waiter.
    Signal,
}

impl RequestKind {
    fn opposite(self) -> Self {
        match self {
            RequestKind::Wait => RequestKind::Signal,
            RequestKind::Signal => RequestKind::Wait,
        }
    }
}

/// Unmatched request waiting in the queue.
struct PendingRequest {
    id: u64,
    kind: RequestKind,
    completion: oneshot::Sender<()>,
}

struct RendezvousState {
    /// Unmatched requests, oldest first. Homogeneous by construction.
    queue: VecDeque<PendingRequest>,

    /// One-shot observers of the next drain.
    drain_observers: Vec<oneshot::Sender<()>>,

    /// Strict-pair mode: one outstanding request per side at most.
    strict: bool,

    /// Number of completed matches.
    matches: u64,

    /// Identifier for the next request.
    next_id: u64,
}

/// Fair rendezvous between asynchronous wait and signal requests.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct RendezvousChannel {
    state: Rc<RefCell<RendezvousState>>,
}

impl Default for RendezvousChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RendezvousChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("RendezvousChannel")
            .field("pending", &state.queue.len())
            .field("pending_kind", &state.queue.front().map(|r| r.kind))
            .field("strict", &state.strict)
            .field("matches", &state.matches)
            .finish()
    }
}

impl RendezvousChannel {
    /// Create a channel with an unbounded queue per side.
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    /// Create a strict-pair channel.
    ///
    /// Issuing a request while another request of the same kind is still
    /// outstanding fails with [`FlowError::ProtocolViolation`].
    pub fn strict() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(strict: bool) -> Self {
        Self {
            state: Rc::new(RefCell::new(RendezvousState {
                queue: VecDeque::new(),
                drain_observers: Vec::new(),
                strict,
                matches: 0,
                next_id: 0,
            })),
        }
    }

    /// Wait for a signal.
    ///
    /// Matches the oldest outstanding signal if there is one, otherwise
    /// queues behind earlier waits.
    pub fn wait(&self) -> FlowResult<Rendezvous> {
        self.request(RequestKind::Wait)
    }

    /// Signal a waiter.
    ///
    /// Matches the oldest outstanding wait if there is one, otherwise queues
    /// behind earlier signals. The returned future resolves once a waiter
    /// picked the signal up.
    pub fn signal(&self) -> FlowResult<Rendezvous> {
        self.request(RequestKind::Signal)
    }

    /// Resolve on the next drain of the queue.
    ///
    /// An already empty queue does not count: the future only resolves when
    /// a later match empties the queue again.
    pub fn wait_all(&self) -> Drained {
        let (tx, rx) = oneshot::channel();
        self.state.borrow_mut().drain_observers.push(tx);
        Drained { drained: Some(rx) }
    }

    /// Number of unmatched requests.
    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Kind of the unmatched requests, if any.
    pub fn pending_kind(&self) -> Option<RequestKind> {
        self.state.borrow().queue.front().map(|r| r.kind)
    }

    /// Whether no request is waiting for a match.
    pub fn is_empty(&self) -> bool {
        self.state.borrow().queue.is_empty()
    }

    /// Whether the channel runs in strict-pair mode.
    pub fn is_strict(&self) -> bool {
        self.state.borrow().strict
    }

    /// Number of matches performed so far.
    pub fn matches(&self) -> u64 {
        self.state.borrow().matches
    }

    /// Withdraw a request that has not been matched yet.
    ///
    /// Returns `false` if the request was already matched. Withdrawing does
    /// not count as a drain, even if it leaves the queue empty.
    pub fn withdraw(&self, request: &mut Rendezvous) -> bool {
        if request.completion.is_none() {
            return false;
        }
        let mut state = self.state.borrow_mut();
        let Some(position) = state.queue.iter().position(|r| r.id == request.id) else {
            return false;
        };
        state.queue.remove(position);
        request.completion = None;
        tracing::trace!(id = request.id, "rendezvous request withdrawn");
        true
    }

    fn request(&self, kind: RequestKind) -> FlowResult<Rendezvous> {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;

        if state.strict && state.queue.iter().any(|r| r.kind == kind) {
            return Err(FlowError::ProtocolViolation(format!(
                "{:?} issued while another {:?} is outstanding",
                kind, kind
            )));
        }

        let counterpart = match state.queue.pop_front() {
            Some(head) if head.kind == kind.opposite() => head,
            head => {
                if let Some(head) = head {
                    state.queue.push_front(head);
                }
                let (tx, rx) = oneshot::channel();
                state.queue.push_back(PendingRequest {
                    id,
                    kind,
                    completion: tx,
                });
                tracing::trace!(?kind, pending = state.queue.len(), "rendezvous request queued");
                return Ok(Rendezvous {
                    id,
                    completion: Some(rx),
                });
            }
        };
        state.matches += 1;

        let observers = if state.queue.is_empty() {
            std::mem::take(&mut state.drain_observers)
        } else {
            Vec::new()
        };
        drop(state);

        // The earlier request settles first; the caller continues afterwards.
        let _ = counterpart.completion.send(());
        tracing::trace!(?kind, "rendezvous matched");

        if !observers.is_empty() {
            tracing::trace!(observers = observers.len(), "rendezvous drained");
        }
        for observer in observers {
            let _ = observer.send(());
        }

        Ok(Rendezvous {
            id,
            completion: None,
        })
    }
}

/// Future returned by [`RendezvousChannel::wait`] and
/// [`RendezvousChannel::signal`].
///
/// Resolves when the request has been matched. It also resolves when the
/// channel is dropped with the request still queued, since nothing can
/// match it anymore.
#[must_use = "dropping a Rendezvous keeps the request queued but ignores its completion"]
pub struct Rendezvous {
    id: u64,
    completion: Option<oneshot::Receiver<()>>,
}

impl Rendezvous {
    /// Check for completion without waiting.
    pub fn is_complete(&mut self) -> bool {
        let Some(completion) = self.completion.as_mut() else {
            return true;
        };
        match completion.try_recv() {
            Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                self.completion = None;
                true
            }
            Err(oneshot::error::TryRecvError::Empty) => false,
        }
    }
}

impl Future for Rendezvous {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(completion) = this.completion.as_mut() else {
            return Poll::Ready(());
        };
        match Pin::new(completion).poll(cx) {
            Poll::Ready(_) => {
                this.completion = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Future returned by [`RendezvousChannel::wait_all`].
///
/// Also resolves when the channel is dropped before draining again.
pub struct Drained {
    drained: Option<oneshot::Receiver<()>>,
}

impl Drained {
    /// Check whether the drain already happened.
    pub fn has_fired(&mut self) -> bool {
        let Some(drained) = self.drained.as_mut() else {
            return true;
        };
        if matches!(
            drained.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ) {
            return false;
        }
        self.drained = None;
        true
    }
}

impl Future for Drained {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(drained) = this.drained.as_mut() else {
            return Poll::Ready(());
        };
        match Pin::new(drained).poll(cx) {
            Poll::Ready(_) => {
                this.drained = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
